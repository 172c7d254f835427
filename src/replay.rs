//! The projector: which archived items does a subscriber see at time t,
//! and with what publication dates?

use chrono::NaiveDate;

use crate::datetime::utc_midnight;
use crate::error::{RecastError, Result};
use crate::feed::{Feed, Item};
use crate::schedule::DateSource;

/// Anything that can hand out archived items oldest-first.
pub trait ReplaySource {
    fn len_items(&self) -> usize;
    /// The item at `idx`, where 0 is the oldest archived item.
    fn item_at(&self, idx: usize) -> Result<Item>;
}

impl ReplaySource for Feed {
    fn len_items(&self) -> usize {
        self.items().len()
    }

    fn item_at(&self, idx: usize) -> Result<Item> {
        let total = self.items().len();
        if idx >= total {
            return Err(RecastError::NotFound(format!("item {idx}")));
        }
        // document order is newest first
        Ok(self.item(total - 1 - idx).clone())
    }
}

/// The up-to-`n` items visible at wall-clock day `t`, newest first, each
/// with its publication date rewritten to the replay schedule.
///
/// An episode is emitted on every scheduled date from the start date
/// until either `t` or the end of the archive, whichever comes first.
/// The window is the last `n` of those emissions.
pub fn shifted_at(
    n: usize,
    t: NaiveDate,
    source: &dyn ReplaySource,
    ds: &mut DateSource,
) -> Result<Vec<Item>> {
    let total = source.len_items();
    let ndays = ds.dates_in_range(ds.start_date(), t);
    let emitted = ndays.min(total as i64).max(0) as usize;
    if emitted == 0 {
        return Err(RecastError::Schedule(
            "replay is entirely in the future".into(),
        ));
    }
    let nskip = emitted.saturating_sub(n);
    ds.reset();
    ds.skip_forward(nskip as i64);

    let nret = n.min(emitted - nskip);
    let mut out = Vec::with_capacity(nret);
    for i in 0..nret {
        let mut item = source.item_at(nskip + i)?;
        let date = ds.next_date()?;
        // items without a pubdate tag ride through undated
        let _ = item.set_pub_date(utc_midnight(date));
        out.push(item);
    }
    out.reverse();
    Ok(out)
}
