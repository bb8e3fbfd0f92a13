pub mod venue;

pub use venue::{PairOutcome, SimControl, SimVenue};
