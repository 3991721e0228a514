//! Bounded in-memory buffer for feed rows between batch upserts.

use parking_lot::Mutex;

use crate::upstream::types::TradeRow;

pub struct TradeBuffer {
    max_size: usize,
    rows: Mutex<Vec<TradeRow>>,
}

impl TradeBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            rows: Mutex::new(Vec::new()),
        }
    }

    /// Append a row. When the buffer reaches its size trigger, the full
    /// batch is drained and returned for an immediate flush.
    pub fn push(&self, row: TradeRow) -> Option<Vec<TradeRow>> {
        let mut rows = self.rows.lock();
        rows.push(row);
        if rows.len() >= self.max_size {
            Some(std::mem::take(&mut *rows))
        } else {
            None
        }
    }

    /// Drain whatever is buffered (interval-triggered flush, shutdown).
    pub fn drain(&self) -> Vec<TradeRow> {
        std::mem::take(&mut *self.rows.lock())
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(n: i64) -> TradeRow {
        let raw = json!({
            "transactionHash": format!("0x{n}"),
            "conditionId": "0xc1",
            "side": "BUY",
            "size": 1.0,
            "price": 0.5,
            "timestamp": 1_700_000_000 + n,
        });
        TradeRow::from_upstream("0xw", &raw).unwrap()
    }

    #[test]
    fn size_trigger_drains_the_batch() {
        let buffer = TradeBuffer::new(3);
        assert!(buffer.push(row(1)).is_none());
        assert!(buffer.push(row(2)).is_none());

        let batch = buffer.push(row(3)).expect("size trigger");
        assert_eq!(batch.len(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_empties_without_a_trigger() {
        let buffer = TradeBuffer::new(50);
        buffer.push(row(1));
        buffer.push(row(2));

        assert_eq!(buffer.drain().len(), 2);
        assert!(buffer.drain().is_empty());
    }
}
