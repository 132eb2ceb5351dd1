//! Bayesian source tracking of microbial communities.
//!
//! Given feature counts for a set of known source environments and for
//! sink samples of mixed origin, estimates how much of each sink comes from
//! each source and from an Unknown environment.
//!
//! ```no_run
//! use sourcetracker::config::GibbsConfig;
//! use sourcetracker::io::read_count_table;
//! use sourcetracker::pipeline::gibbs;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let sources = read_count_table(Path::new("sources.tsv"), false)?;
//! let sinks = read_count_table(Path::new("sinks.tsv"), false)?;
//! let results = gibbs(&sources, &sinks, &GibbsConfig::default())?;
//! println!("{:?}", results.proportions.means);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod count_table;
pub mod io;
pub mod pipeline;
pub mod stats;
pub mod utils;

pub use config::GibbsConfig;
pub use count_table::CountTable;
pub use stats::{GibbsError, GibbsResults};
