use std::collections::VecDeque;

/// Dense buffer of completed predictions indexed by original row position.
///
/// Batches complete in any order. Row `batch_index * batch_size + offset` lands in its own
/// slot, and rows leave the buffer only from the front once every earlier row has arrived,
/// so the output always follows input order.
#[derive(Debug, Clone)]
pub struct Reassembler {
    batch_size: usize,

    /// Row index held by the first slot of `window`
    base_row: usize,

    /// `None` until the row's batch completes; then the row's prediction, if any
    window: VecDeque<Option<Option<usize>>>,
}

impl Reassembler {
    /// Create an empty buffer for batches of `batch_size` rows
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            base_row: 0,
            window: VecDeque::new(),
        }
    }

    /// Record the predictions of a completed batch
    pub fn complete(&mut self, batch_index: usize, predictions: Vec<Option<usize>>) {
        let start = batch_index * self.batch_size;

        for (offset, prediction) in predictions.into_iter().enumerate() {
            let Some(slot) = (start + offset).checked_sub(self.base_row) else {
                warn!("Ignoring row {} which was already released", start + offset);
                continue;
            };

            if slot >= self.window.len() {
                self.window.resize(slot + 1, None);
            }

            self.window[slot] = Some(prediction);
        }
    }

    /// Number of rows at the front that are complete and in order
    pub fn ready(&self) -> usize {
        self.window.iter().take_while(|slot| slot.is_some()).count()
    }

    /// Remove up to `limit` ordered rows from the front, returning the row index of the first
    /// one and the predictions
    pub fn take(&mut self, limit: usize) -> (usize, Vec<Option<usize>>) {
        let count = self.ready().min(limit);
        let first_row = self.base_row;

        let rows = self.window.drain(..count).map(Option::flatten).collect();
        self.base_row += count;

        (first_row, rows)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn batch(batch_index: usize, len: usize) -> Vec<Option<usize>> {
        (0..len).map(|offset| Some(batch_index * 3 + offset)).collect()
    }

    #[test]
    fn test_out_of_order_completion_is_released_in_order() {
        let mut buffer = Reassembler::new(3);

        buffer.complete(2, batch(2, 3));
        buffer.complete(1, batch(1, 3));
        assert_eq!(buffer.ready(), 0);

        buffer.complete(0, batch(0, 3));
        assert_eq!(buffer.ready(), 9);

        let (first, rows) = buffer.take(usize::MAX);
        assert_eq!(first, 0);
        assert_eq!(rows, (0..9).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn test_every_completion_order_restores_row_order() {
        let orders = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
            [3, 0, 2, 1],
        ];

        for order in orders {
            let mut buffer = Reassembler::new(3);
            let mut released = Vec::new();

            for batch_index in order {
                let len = if batch_index == 3 { 1 } else { 3 };
                buffer.complete(batch_index, batch(batch_index, len));

                let (_, rows) = buffer.take(usize::MAX);
                released.extend(rows);
            }

            assert_eq!(released, (0..10).map(Some).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_take_respects_limit_and_failed_rows() {
        let mut buffer = Reassembler::new(3);

        buffer.complete(0, vec![Some(1), Some(2), Some(0)]);
        buffer.complete(1, vec![None, None, None]);

        let (first, rows) = buffer.take(5);
        assert_eq!(first, 0);
        assert_eq!(rows, vec![Some(1), Some(2), Some(0), None, None]);

        assert_eq!(buffer.take(5), (5, vec![None]));
    }
}
