//! Single-open-menu coordination for the per-row action dropdowns.

/// Where a document-level pointer click landed, as classified by the
/// rendering shell. Only clicks outside every menu trigger and menu body
/// dismiss the open menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOrigin {
    MenuTrigger,
    MenuBody,
    Outside,
}

impl ClickOrigin {
    pub fn dismisses_menus(self) -> bool {
        matches!(self, Self::Outside)
    }
}

/// At most one named menu is open at a time.
#[derive(Debug, Default)]
pub struct MenuController {
    open: Option<String>,
}

impl MenuController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `name`, or closes it if it was already the open menu. Opening
    /// one menu closes whichever other menu was open.
    pub fn toggle(&mut self, name: &str) {
        if self.open.as_deref() == Some(name) {
            self.open = None;
        } else {
            self.open = Some(name.to_string());
        }
    }

    pub fn close(&mut self) {
        self.open = None;
    }

    pub fn open(&self) -> Option<&str> {
        self.open.as_deref()
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open.as_deref() == Some(name)
    }

    pub fn handle_click(&mut self, origin: ClickOrigin) {
        if origin.dismisses_menus() {
            self.close();
        }
    }
}
