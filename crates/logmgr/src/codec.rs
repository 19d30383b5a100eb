use cooldb_common::{Attachment, PageId, RecordType, RedoLogRecord, TransId, UndoPointer};

/// Encodes a `RedoLogRecord`'s body exactly per the on-disk layout:
/// `[type:u8][transId:u64][segmentId:PageId(6)][pageId:PageId(6)]
///  [segmentType:u8][pageType:u8][undoNxtLSN:UndoPointer(16)][dataCount:u32]
///  [data entry...]`, where each entry is `[flag:u8][len:u32][len bytes]`.
/// The record's own `lsn` is not part of the body — it is the address the
/// redo log writer assigns at append time.
pub fn encode(record: &RedoLogRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.push(record.rec_type as u8);
    buf.extend_from_slice(&record.trans_id.to_le_bytes());
    buf.extend_from_slice(&record.segment_id.encode());
    buf.extend_from_slice(&record.page_id.encode());
    buf.push(record.segment_type);
    buf.push(record.page_type);
    buf.extend_from_slice(&record.undo_nxt_lsn.encode());
    buf.extend_from_slice(&(record.attachments.len() as u32).to_le_bytes());
    for a in &record.attachments {
        buf.push(a.flag);
        buf.extend_from_slice(&(a.bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&a.bytes);
    }
    buf
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("redo record body truncated")]
    Truncated,
    #[error("unknown record type byte {0}")]
    UnknownRecordType(u8),
}

pub fn decode(buf: &[u8]) -> Result<RedoLogRecord, CodecError> {
    let mut pos = 0usize;
    macro_rules! need {
        ($n:expr) => {{
            if pos + $n > buf.len() {
                return Err(CodecError::Truncated);
            }
            let slice = &buf[pos..pos + $n];
            pos += $n;
            slice
        }};
    }

    let rec_type = RecordType::from_byte(need!(1)[0]).ok_or(CodecError::UnknownRecordType(buf[0]))?;
    let trans_id = TransId::from_le_bytes(need!(8).try_into().unwrap());
    let segment_id = PageId::decode(need!(6).try_into().unwrap());
    let page_id = PageId::decode(need!(6).try_into().unwrap());
    let segment_type = need!(1)[0];
    let page_type = need!(1)[0];
    let undo_nxt_lsn = UndoPointer::decode(need!(16).try_into().unwrap());
    let data_count = u32::from_le_bytes(need!(4).try_into().unwrap());

    let mut attachments = Vec::with_capacity(data_count as usize);
    for _ in 0..data_count {
        let flag = need!(1)[0];
        let len = u32::from_le_bytes(need!(4).try_into().unwrap()) as usize;
        let bytes = need!(len).to_vec();
        attachments.push(Attachment { flag, bytes });
    }

    Ok(RedoLogRecord { lsn: 0, rec_type, trans_id, segment_id, page_id, segment_type, page_type, undo_nxt_lsn, attachments })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_roundtrips_with_attachments() {
        let record = RedoLogRecord::new(RecordType::Update, 7, PageId::new(0, 1), PageId::new(0, 2), 3, 4)
            .with_attachment(0, vec![1, 2, 3])
            .with_attachment(1, vec![9]);
        let bytes = encode(&record);
        let back = decode(&bytes).unwrap();
        assert_eq!(back.trans_id, 7);
        assert_eq!(back.attachments.len(), 2);
        assert_eq!(back.attachments[1].bytes, vec![9]);
    }
}
