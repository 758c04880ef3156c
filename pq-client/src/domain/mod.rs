mod dip_event;
mod meter;
mod profile;
mod weight_entry;

pub use dip_event::{DipEvent, NO_DIP_VOLTAGE_PCT};
pub use meter::{Meter, MeterId};
pub use profile::{Profile, ProfileId};
pub use weight_entry::{WeightEntry, WeightId};
