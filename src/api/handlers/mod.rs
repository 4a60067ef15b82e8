pub mod health;
pub mod transfers;
