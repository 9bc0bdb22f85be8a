//! Window events latched until the next frame.
//!
//! Window callbacks may fire several times between two frames (restoring a
//! window commonly sends a burst of identical resize events). They only
//! record what was asked for; the renderer applies the latest request once at
//! the start of the frame.

/// Swap chain work to do before rendering a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapChainAction {
    Create { width: u32, height: u32 },
    /// Resize; a no-op if the size did not change.
    Resize { width: u32, height: u32 },
    /// Rebuild at this size even if it did not change.
    Rebuild { width: u32, height: u32 },
}

#[derive(Debug, Default)]
pub struct WindowRequests {
    size: (u32, u32),
    create: bool,
    resize: bool,
    rebuild: bool,
    minimized: bool,
}

impl WindowRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window_created(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.create = true;
    }

    pub fn window_resized(&mut self, width: u32, height: u32, minimized: bool) {
        self.minimized = minimized || width == 0 || height == 0;
        if !self.minimized {
            self.size = (width, height);
            self.resize = true;
        }
    }

    /// The swap chain went out of date; rebuild it before the next frame.
    pub fn swap_chain_lost(&mut self) {
        self.rebuild = true;
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Take the pending action, if any.
    ///
    /// Nothing is taken while the window is minimized. Creation wins over
    /// everything else; without a swap chain, resizes and rebuilds wait.
    pub fn take(&mut self, has_swap_chain: bool) -> Option<SwapChainAction> {
        if self.minimized {
            return None;
        }
        let (width, height) = self.size;

        if self.create {
            self.create = false;
            self.resize = false;
            self.rebuild = false;
            return Some(SwapChainAction::Create { width, height });
        }
        if !has_swap_chain {
            return None;
        }
        if self.rebuild {
            self.rebuild = false;
            self.resize = false;
            return Some(SwapChainAction::Rebuild { width, height });
        }
        if self.resize {
            self.resize = false;
            return Some(SwapChainAction::Resize { width, height });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_pending_initially() {
        let mut requests = WindowRequests::new();
        assert_eq!(requests.take(false), None);
        assert_eq!(requests.take(true), None);
    }

    #[test]
    fn test_burst_of_resizes_applies_last_size_once() {
        let mut requests = WindowRequests::new();
        requests.window_resized(800, 600, false);
        requests.window_resized(1024, 768, false);
        requests.window_resized(1024, 768, false);

        assert_eq!(
            requests.take(true),
            Some(SwapChainAction::Resize {
                width: 1024,
                height: 768
            })
        );
        assert_eq!(requests.take(true), None);
    }

    #[test]
    fn test_create_supersedes_resize() {
        let mut requests = WindowRequests::new();
        requests.window_created(640, 480);
        requests.window_resized(800, 600, false);

        assert_eq!(
            requests.take(false),
            Some(SwapChainAction::Create {
                width: 800,
                height: 600
            })
        );
        assert_eq!(requests.take(true), None);
    }

    #[test]
    fn test_minimized_window_defers_everything() {
        let mut requests = WindowRequests::new();
        requests.window_created(640, 480);
        requests.window_resized(0, 0, true);
        assert!(requests.is_minimized());
        assert_eq!(requests.take(false), None);

        requests.window_resized(640, 480, false);
        assert_eq!(
            requests.take(false),
            Some(SwapChainAction::Create {
                width: 640,
                height: 480
            })
        );
    }

    #[test]
    fn test_minimize_keeps_last_usable_size() {
        let mut requests = WindowRequests::new();
        requests.window_created(640, 480);
        requests.window_resized(0, 0, false);
        assert!(requests.is_minimized());
        assert_eq!(requests.size(), (640, 480));
    }

    #[test]
    fn test_rebuild_waits_for_swap_chain() {
        let mut requests = WindowRequests::new();
        requests.window_resized(800, 600, false);
        requests.swap_chain_lost();
        assert_eq!(requests.take(false), None);

        assert_eq!(
            requests.take(true),
            Some(SwapChainAction::Rebuild {
                width: 800,
                height: 600
            })
        );
        assert_eq!(requests.take(true), None);
    }
}
