pub mod protocol;
pub mod geometry;
pub mod entities;
pub mod items;
pub mod drops;

pub use protocol::*;
pub use geometry::*;
pub use entities::*;
pub use items::*;
pub use drops::*;
