use serde_json::Value;

/// Iterator over contiguous `(from, to)` block ranges, both inclusive.
#[derive(Clone, Debug)]
pub struct Chunks {
    next: Option<u64>,
    end: u64,
    chunk_size: u64,
}

impl Iterator for Chunks {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        let end = start.saturating_add(self.chunk_size - 1).min(self.end);

        self.next = end.checked_add(1).filter(|&n| n <= self.end);

        Some((start, end))
    }
}

/// Splits `start..=end` into ranges of at most `chunk_size` blocks.
///
/// Yields nothing when `start > end` or `chunk_size == 0`.
pub fn build_chunks(start: u64, end: u64, chunk_size: u64) -> Chunks {
    Chunks {
        next: (chunk_size > 0 && start <= end).then_some(start),
        end,
        chunk_size,
    }
}

/// Number of chunks `build_chunks` yields, saturating at `u64::MAX`.
pub fn chunk_count(start: u64, end: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 || start > end {
        return 0;
    }

    ((end - start) / chunk_size).saturating_add(1)
}

/// Number of blocks in `start..=end`; the full `u64` range does not fit a `u64`.
pub fn unit_count(start: u64, end: u64) -> u128 {
    if start > end {
        return 0;
    }

    u128::from(end - start) + 1
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedBlock {
    #[error("expected a block object, got {0}")]
    NotAnObject(&'static str),

    #[error("block transactions is {0}, expected an array")]
    Transactions(&'static str),
}

/// Pulls the transaction list out of an `eth_getBlockByNumber` result.
///
/// `null` means the block does not exist yet. A block without a
/// `transactions` field contributes nothing.
pub fn block_transactions(block: Value) -> Result<Option<Vec<Value>>, MalformedBlock> {
    let mut block = match block {
        Value::Null => return Ok(None),
        Value::Object(map) => map,
        other => return Err(MalformedBlock::NotAnObject(kind(&other))),
    };

    match block.remove("transactions") {
        None => Ok(Some(Vec::new())),
        Some(Value::Array(txs)) => Ok(Some(txs)),
        Some(other) => Err(MalformedBlock::Transactions(kind(&other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
