/// Category legend: integer land-cover code → name and display colour.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub code: u16,
    pub name: String,
    /// Display colour, RGB.
    pub color: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Legend {
    pub categories: Vec<Category>,
}

impl Legend {
    pub fn new(mut categories: Vec<Category>) -> Self {
        categories.sort_by_key(|c| c.code);
        categories.dedup_by_key(|c| c.code);
        Self { categories }
    }

    /// The five-class legend shared by the training and validation rasters.
    pub fn landcover() -> Self {
        let cat = |code, name: &str, color| Category { code, name: name.to_string(), color };
        Self::new(vec![
            cat(1, "built-up", [230, 0, 0]),
            cat(2, "agriculture", [255, 211, 0]),
            cat(3, "forest", [38, 115, 0]),
            cat(4, "water", [0, 92, 230]),
            cat(5, "other", [178, 178, 178]),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.categories.iter().map(|c| c.code)
    }

    pub fn get(&self, code: u16) -> Option<&Category> {
        self.categories
            .binary_search_by_key(&code, |c| c.code)
            .ok()
            .map(|i| &self.categories[i])
    }

    pub fn name(&self, code: u16) -> Option<&str> {
        self.get(code).map(|c| c.name.as_str())
    }

    /// Name if known, otherwise the numeric code.
    pub fn label(&self, code: u16) -> String {
        self.name(code).map_or_else(|| code.to_string(), str::to_string)
    }

    /// Unknown codes render mid-grey.
    pub fn color(&self, code: u16) -> [u8; 3] {
        self.get(code).map_or([128, 128, 128], |c| c.color)
    }
}

impl Default for Legend {
    fn default() -> Self {
        Self::landcover()
    }
}
