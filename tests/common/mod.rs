#![allow(dead_code)]

pub mod entities;
pub mod fakes;

pub use entities::User;
pub use fakes::{counted_step, has_cause, Counter, FakePool, FakeTx};
