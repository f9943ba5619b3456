pub mod address;
pub mod error;
pub mod scope;
pub mod value;

pub use address::*;
pub use error::*;
pub use scope::WorkbookScoped;
pub use value::*;
