// Local characterization stages, composed by `LocalPipeline`

pub mod caption;
pub mod color;
pub mod labels;
pub mod local;

pub use caption::{build_tags, compose};
pub use color::{name_color, ColorAnalyzer};
pub use labels::{canonicalize, clean_label, is_jewelry};
pub use local::LocalPipeline;
