//! The papers table: a fixed arrow schema over `CanonicalPaper` plus an
//! append-only parquet sink.
//!
//! Append disposition mirrors the load job it replaces: create the
//! destination if absent, append if present. Each append writes a uniquely
//! named part file, so re-running a load over the same input appends
//! duplicate rows; callers track which input snapshots have been loaded.

use paperflow_core::{CanonicalPaper, Error, PaperSink, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{
    ArrayRef, Int64Array, ListBuilder, RecordBatch, StringArray, StringBuilder, StructBuilder,
};
use arrow::datatypes::{DataType, Field, Fields, Schema};

fn author_fields() -> Fields {
    Fields::from(vec![
        Field::new("name", DataType::Utf8, true),
        Field::new("id", DataType::Utf8, true),
    ])
}

fn list_utf8() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
}

/// Fixed destination schema for normalized papers. Validated on every append
/// into a non-empty destination; a mismatch is fatal.
pub fn paper_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("paper_id", DataType::Utf8, false),
        Field::new("doi", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("created_date", DataType::Utf8, true),
        Field::new("cited_by_count", DataType::Int64, true),
        Field::new("abstract", DataType::Utf8, false),
        Field::new("related_works", list_utf8(), false),
        Field::new("referenced_works", list_utf8(), false),
        Field::new("cited_by_api_url", DataType::Utf8, true),
        Field::new("oa_status", DataType::Utf8, true),
        Field::new("oa_url", DataType::Utf8, true),
        Field::new(
            "authors",
            DataType::List(Arc::new(Field::new(
                "item",
                DataType::Struct(author_fields()),
                true,
            ))),
            false,
        ),
    ]))
}

fn string_list(values: impl Iterator<Item = Vec<String>> + Clone) -> ArrayRef {
    let mut b = ListBuilder::new(StringBuilder::new());
    for row in values {
        for v in row {
            b.values().append_value(v);
        }
        b.append(true);
    }
    Arc::new(b.finish())
}

/// Convert a batch of papers into one arrow record batch matching
/// [`paper_schema`].
pub fn papers_to_batch(papers: &[CanonicalPaper]) -> Result<RecordBatch> {
    let schema = paper_schema();

    let paper_id: ArrayRef = Arc::new(StringArray::from_iter_values(
        papers.iter().map(|p| p.paper_id.as_str()),
    ));
    let doi: ArrayRef = Arc::new(StringArray::from(
        papers.iter().map(|p| p.doi.as_deref()).collect::<Vec<_>>(),
    ));
    let title: ArrayRef = Arc::new(StringArray::from(
        papers.iter().map(|p| p.title.as_deref()).collect::<Vec<_>>(),
    ));
    let created_date: ArrayRef = Arc::new(StringArray::from(
        papers
            .iter()
            .map(|p| p.created_date.as_deref())
            .collect::<Vec<_>>(),
    ));
    let cited_by_count: ArrayRef = Arc::new(Int64Array::from(
        papers.iter().map(|p| p.cited_by_count).collect::<Vec<_>>(),
    ));
    let abstract_text: ArrayRef = Arc::new(StringArray::from_iter_values(
        papers.iter().map(|p| p.abstract_text.as_str()),
    ));
    let related_works = string_list(papers.iter().map(|p| p.related_works.clone()));
    let referenced_works = string_list(papers.iter().map(|p| p.referenced_works.clone()));
    let cited_by_api_url: ArrayRef = Arc::new(StringArray::from(
        papers
            .iter()
            .map(|p| p.cited_by_api_url.as_deref())
            .collect::<Vec<_>>(),
    ));
    let oa_status: ArrayRef = Arc::new(StringArray::from(
        papers
            .iter()
            .map(|p| p.oa_status.as_deref())
            .collect::<Vec<_>>(),
    ));
    let oa_url: ArrayRef = Arc::new(StringArray::from(
        papers.iter().map(|p| p.oa_url.as_deref()).collect::<Vec<_>>(),
    ));

    let mut authors_b = ListBuilder::new(StructBuilder::new(
        author_fields(),
        vec![
            Box::new(StringBuilder::new()),
            Box::new(StringBuilder::new()),
        ],
    ));
    for p in papers {
        for a in &p.authors {
            let sb = authors_b.values();
            sb.field_builder::<StringBuilder>(0)
                .expect("name builder")
                .append_value(&a.name);
            sb.field_builder::<StringBuilder>(1)
                .expect("id builder")
                .append_value(&a.id);
            sb.append(true);
        }
        authors_b.append(true);
    }
    let authors: ArrayRef = Arc::new(authors_b.finish());

    RecordBatch::try_new(
        schema,
        vec![
            paper_id,
            doi,
            title,
            created_date,
            cited_by_count,
            abstract_text,
            related_works,
            referenced_works,
            cited_by_api_url,
            oa_status,
            oa_url,
            authors,
        ],
    )
    .map_err(|e| Error::Sink(e.to_string()))
}

static PART_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_part_name() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let n = PART_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("part-{micros:016x}-{n:06}.parquet")
}

fn part_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return Ok(out),
    };
    for e in rd.flatten() {
        let p = e.path();
        let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with("part-") && name.ends_with(".parquet") {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}

fn validate_existing_schema(dir: &Path) -> Result<()> {
    let parts = part_files(dir)?;
    let Some(first) = parts.first() else {
        return Ok(());
    };
    let file = fs::File::open(first).map_err(|e| Error::Sink(e.to_string()))?;
    let reader =
        ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| Error::Sink(e.to_string()))?;
    if reader.schema().as_ref() != paper_schema().as_ref() {
        return Err(Error::Sink(format!(
            "destination {} has a different schema than the papers table",
            dir.display()
        )));
    }
    Ok(())
}

fn write_part(dir: &Path, batch: &RecordBatch) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::Sink(e.to_string()))?;
    validate_existing_schema(dir)?;
    let path = dir.join(next_part_name());
    let file = fs::File::create(&path).map_err(|e| Error::Sink(e.to_string()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .map_err(|e| Error::Sink(e.to_string()))?;
    writer.write(batch).map_err(|e| Error::Sink(e.to_string()))?;
    writer.close().map_err(|e| Error::Sink(e.to_string()))?;
    Ok(())
}

/// Append-only parquet destination: a directory of uniquely named part files
/// sharing the fixed papers schema.
#[derive(Debug, Clone)]
pub struct ParquetTableSink {
    dir: PathBuf,
}

impl ParquetTableSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Read every part file back (sorted by part name). Test/verification
    /// helper; the serving layer reads the table through its own engine.
    pub fn read_all(&self) -> Result<Vec<RecordBatch>> {
        let mut out = Vec::new();
        for p in part_files(&self.dir)? {
            let file = fs::File::open(&p).map_err(|e| Error::Sink(e.to_string()))?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)
                .map_err(|e| Error::Sink(e.to_string()))?
                .build()
                .map_err(|e| Error::Sink(e.to_string()))?;
            for batch in reader {
                out.push(batch.map_err(|e| Error::Sink(e.to_string()))?);
            }
        }
        Ok(out)
    }

    pub fn row_count(&self) -> Result<usize> {
        Ok(self.read_all()?.iter().map(RecordBatch::num_rows).sum())
    }
}

#[async_trait::async_trait]
impl PaperSink for ParquetTableSink {
    async fn append(&self, papers: &[CanonicalPaper]) -> Result<()> {
        if papers.is_empty() {
            return Ok(());
        }
        let batch = papers_to_batch(papers)?;
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || write_part(&dir, &batch))
            .await
            .map_err(|e| Error::Sink(format!("append join failed: {e}")))?
    }
}

/// In-memory sink for tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<CanonicalPaper>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<CanonicalPaper> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl PaperSink for MemorySink {
    async fn append(&self, papers: &[CanonicalPaper]) -> Result<()> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(papers);
        Ok(())
    }
}
