pub mod prelude;

pub mod transfers;
