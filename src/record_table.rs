use std::collections::HashSet;
use std::fs;
use std::path::Path;
use csv::ByteRecord;
use log::{info, warn, error};

use crate::member::{parse_user_id, Record};
use crate::store::{write_atomic, StoreError};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Reads every row of the table. A missing file is an empty table; rows that
/// fail to parse are logged and skipped.
pub fn read_records(path: &Path) -> Result<Vec<Record>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path)?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(body);

    let mut records = Vec::new();
    for result in rdr.deserialize::<Record>() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => error!("Skipping unreadable row in {:?}: {}", path, e),
        }
    }
    info!("Loaded {} records from {:?}", records.len(), path);
    Ok(dedup_keep_last(records))
}

/// Collects the `user_id` of every row whose id cell is readable, including
/// rows whose other cells are not.
pub fn read_ids(path: &Path) -> Result<HashSet<i64>, StoreError> {
    let Some((header, rows)) = read_raw(path)? else {
        return Ok(HashSet::new());
    };
    let Some(id_pos) = column_index(&header, "user_id") else {
        warn!("No user_id column in {:?}", path);
        return Ok(HashSet::new());
    };

    let mut ids = HashSet::new();
    let mut unreadable = 0;
    for row in &rows {
        match cell_id(row, id_pos) {
            Some(id) => {
                ids.insert(id);
            }
            None => unreadable += 1,
        }
    }
    if unreadable > 0 {
        warn!("{} rows in {:?} have no readable user_id", unreadable, path);
    }
    info!("Loaded {} known ids from {:?}", ids.len(), path);
    Ok(ids)
}

/// Upserts `incoming` into the table at `path`. Existing rows whose id is not
/// in `incoming` are written back byte for byte, whatever their other cells
/// hold. Replaced rows move to the end, as a concatenate-then-drop-duplicates
/// (keep last) merge would leave them. The table is rewritten BOM-prefixed so
/// spreadsheet tools detect UTF-8.
pub fn merge_into(path: &Path, incoming: &[Record]) -> Result<(), StoreError> {
    let (mut header, rows) = match read_raw(path)? {
        Some((header, rows)) if !header.is_empty() => (header, rows),
        _ => (ByteRecord::from(Record::COLUMNS.to_vec()), Vec::new()),
    };
    let positions: Vec<usize> = Record::COLUMNS
        .iter()
        .map(|name| ensure_column(&mut header, name))
        .collect();
    let id_pos = positions[0];

    let incoming = dedup_keep_last(incoming.to_vec());
    let replaced: HashSet<i64> = incoming.iter().map(|r| r.user_id).collect();

    let mut buf = UTF8_BOM.to_vec();
    {
        let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(&mut buf);
        wtr.write_byte_record(&header)?;
        for mut row in rows {
            if cell_id(&row, id_pos).map_or(false, |id| replaced.contains(&id)) {
                continue;
            }
            while row.len() < header.len() {
                row.push_field(b"");
            }
            wtr.write_byte_record(&row)?;
        }
        for record in &incoming {
            let mut cells = vec![String::new(); header.len()];
            for (pos, value) in positions.iter().zip(record.fields()) {
                cells[*pos] = value;
            }
            wtr.write_record(&cells)?;
        }
        wtr.flush()?;
    }
    write_atomic(path, &buf)
}

/// Header and rows as stored, without interpreting any cell.
fn read_raw(path: &Path) -> Result<Option<(ByteRecord, Vec<ByteRecord>)>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(body);
    let header = rdr.byte_headers()?.clone();
    let mut rows = Vec::new();
    for result in rdr.byte_records() {
        rows.push(result?);
    }
    Ok(Some((header, rows)))
}

fn column_index(header: &ByteRecord, name: &str) -> Option<usize> {
    header
        .iter()
        .position(|field| String::from_utf8_lossy(field).trim() == name)
}

fn ensure_column(header: &mut ByteRecord, name: &str) -> usize {
    match column_index(header, name) {
        Some(pos) => pos,
        None => {
            header.push_field(name.as_bytes());
            header.len() - 1
        }
    }
}

fn cell_id(row: &ByteRecord, pos: usize) -> Option<i64> {
    row.get(pos)
        .and_then(|cell| std::str::from_utf8(cell).ok())
        .and_then(parse_user_id)
}

fn dedup_keep_last(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    let mut kept: Vec<Record> = records
        .into_iter()
        .rev()
        .filter(|r| seen.insert(r.user_id))
        .collect();
    kept.reverse();
    kept
}
