use std::collections::HashMap;

/// Display colors handed out to participants in first-seen order.
pub const PALETTE: [&str; 16] = [
    "#006", "#606", "#900", "#633", "#030", "#036", "#00c", "#90c", "#c30", "#330", "#066",
    "#00f", "#c39", "#933", "#663", "#099",
];

/// Append-only participant → color mapping.
#[derive(Debug, Clone, Default)]
pub struct ColorAssigner {
    assigned: HashMap<String, usize>,
    picked: usize,
}

impl ColorAssigner {
    /// Color for `name`, assigning the next palette slot on first sight.
    pub fn color_for(&mut self, name: &str) -> &'static str {
        if let Some(slot) = self.assigned.get(name) {
            return PALETTE[*slot];
        }
        let slot = self.picked % PALETTE.len();
        self.picked += 1;
        self.assigned.insert(name.to_owned(), slot);
        PALETTE[slot]
    }

    pub fn get(&self, name: &str) -> Option<&'static str> {
        self.assigned.get(name).map(|slot| PALETTE[*slot])
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
