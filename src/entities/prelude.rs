pub use super::transfers::Entity as Transfers;
