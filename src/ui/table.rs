use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct SettingRow {
    #[tabled(rename = "Setting")]
    pub setting: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<SettingRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(SettingRow {
            setting: label.to_string(),
            value: value.to_string(),
        });
    }

    /// Add a row only when the value is present
    pub fn add_optional(&mut self, label: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.add_row(label, value);
        }
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}
