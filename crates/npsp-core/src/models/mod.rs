//! Domain models for the study platform.

mod completion;
mod forms;
mod researcher;
mod site;
mod subject;

pub use completion::*;
pub use forms::*;
pub use researcher::*;
pub use site::*;
pub use subject::*;
