pub mod annotate;
pub mod config;
pub mod error;
pub mod ir;
pub mod logging;
pub mod profile;

pub use annotate::{AnnotationOutput, AutoProfile, CallEdge, InlinerHooks, NoopInliner};
pub use config::AutoFdoConfig;
pub use error::ProfileError;
pub use profile::{read_profile, read_profile_file, Profile, ProfileWriter};
