pub mod crop;
pub mod cycle;
pub mod field;
pub mod nutrients;
pub mod rainfall;
pub mod recommendation;
pub mod soil;
pub mod weather;

pub use crop::*;
pub use cycle::*;
pub use field::*;
pub use nutrients::*;
pub use rainfall::*;
pub use recommendation::*;
pub use soil::*;
pub use weather::*;
