pub mod gibbs;

pub use gibbs::{gibbs, gibbs_loo};
