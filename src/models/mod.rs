pub mod enums;
pub mod food;
pub mod nutrition;
pub mod outcome;

pub use enums::*;
pub use food::*;
pub use nutrition::*;
pub use outcome::*;
