pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{error, header, info, success, timing, warn};
pub use progress::ReadProgress;
pub use table::TableBuilder;
pub use theme::{theme, Theme};
