pub struct Icons;

impl Icons {
    pub const BOOK: &str = "📚";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const FILE: &str = "📄";
    pub const CLOCK: &str = "⏱️";
}
