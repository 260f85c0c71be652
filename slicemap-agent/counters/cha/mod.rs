pub mod programmer;
pub mod reader;

pub use programmer::CounterProgrammer;
pub use reader::{corrected_delta, CounterDelta, CounterReader};
