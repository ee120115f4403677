/// Full pre-mutation copy of a collection, held for the lifetime of one
/// optimistic mutation. A snapshot shares no structure with the live
/// collection, so in-place edits after capture cannot leak into it.
#[derive(Debug, Clone)]
pub struct Snapshot<T: Clone> {
    items: Vec<T>,
}

impl<T: Clone> Snapshot<T> {
    pub fn capture(items: &[T]) -> Self {
        Self {
            items: items.to_vec(),
        }
    }

    /// Materializes the captured sequence. Restoring the same snapshot
    /// twice yields the same result.
    pub fn to_items(&self) -> Vec<T> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item {
        id: u32,
        label: String,
    }

    fn item(id: u32, label: &str) -> Item {
        Item {
            id,
            label: label.to_string(),
        }
    }

    #[test]
    fn capture_is_independent_of_later_edits() {
        let mut live = vec![item(1, "a"), item(2, "b")];
        let snapshot = Snapshot::capture(&live);

        live[0].label = "mutated".to_string();
        live.swap(0, 1);
        live.pop();

        assert_eq!(snapshot.to_items(), vec![item(1, "a"), item(2, "b")]);
    }

    #[test]
    fn restore_is_idempotent() {
        let live = vec![item(1, "a"), item(2, "b"), item(3, "c")];
        let snapshot = Snapshot::capture(&live);

        let first = snapshot.to_items();
        let second = snapshot.to_items();
        assert_eq!(first, second);
        assert_eq!(second, live);
    }
}
