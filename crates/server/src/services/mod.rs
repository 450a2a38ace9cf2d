pub mod approval;
pub mod clocking;
pub mod events;
pub mod ledger;
