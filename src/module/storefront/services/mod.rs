mod customers;
mod orders;
mod products;

pub use customers::*;
pub use orders::*;
pub use products::*;
