pub mod analysis;
pub mod bootstrap;
pub mod demography;
pub mod error_model;
pub mod hky;
pub mod integrator;
pub mod io;
pub mod likelihood;
pub mod nucleotide;
pub mod opt;
pub mod patterns;
pub mod progress;
pub mod simulate;
pub mod site_rates;
pub mod taxa;
pub mod utils;

pub use demography::Skyline;
pub use hky::HkyModel;
pub use integrator::HkySkylineIntegrator;
pub use likelihood::PairwiseCompositeLikelihood;
pub use patterns::{PairedPatterns, SitePatterns};
