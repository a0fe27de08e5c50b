//! Lifecycle state shared by the live dashboard components.

use serde::Serialize;

/// `Idle → Loading → Ready` on mount, `Ready → Ready` on updates and
/// `Loading` again when the period changes. There is no terminal state.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "phase", content = "data", rename_all = "snake_case")]
pub enum ComponentState<T> {
    #[default]
    Idle,
    Loading,
    Ready(T),
}

impl<T> ComponentState<T> {
    /// Enter `Loading`, handing back the data that was on display.
    pub fn begin_loading(&mut self) -> Option<T> {
        match std::mem::replace(self, ComponentState::Loading) {
            ComponentState::Ready(data) => Some(data),
            _ => None,
        }
    }

    pub fn finish(&mut self, data: T) {
        *self = ComponentState::Ready(data);
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ComponentState::Loading)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ComponentState::Ready(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ComponentState::Ready(data) => Some(data),
            _ => None,
        }
    }

    pub fn data_mut(&mut self) -> Option<&mut T> {
        match self {
            ComponentState::Ready(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut state: ComponentState<Vec<u32>> = ComponentState::default();
        assert_eq!(state, ComponentState::Idle);
        assert_eq!(state.begin_loading(), None);
        assert!(state.is_loading());

        state.finish(vec![1, 2]);
        assert!(state.is_ready());
        assert_eq!(state.data(), Some(&vec![1, 2]));

        // Period change re-enters loading and returns the displayed data.
        assert_eq!(state.begin_loading(), Some(vec![1, 2]));
        assert!(state.data().is_none());
    }
}
