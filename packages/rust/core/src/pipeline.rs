//! End-to-end ingestion: PDF → fragments → chunks → embeddings → index.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use rulevault_chunker::RulebookChunker;
use rulevault_embedder::Embedder;
use rulevault_extractor::PdfExtractor;
use rulevault_retriever::{CollectionStats, Retriever};
use rulevault_shared::{
    AppConfig, Chunk, EmbeddingConfig, EmbeddingRecord, Metadata, Result, RetrieverConfig,
    RuleVaultError, Stage, expand_home,
};
use rulevault_storage::Storage;

use crate::report::{
    ChunkingReport, EmbeddingReport, ExtractionReport, FormattedResult, IndexingReport,
    IngestReport, StageReports, parse_content_types,
};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn phase(&self, name: &str);
    /// Called after each embedding batch.
    fn embedded(&self, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, report: &IngestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn embedded(&self, _current: usize, _total: usize) {}
    fn done(&self, _report: &IngestReport) {}
}

/// The four ingestion stages plus the query side, wired from one config.
pub struct RagPipeline {
    extractor: PdfExtractor,
    chunker: RulebookChunker,
    embedder: Arc<Embedder>,
    retriever: Retriever,
    storage: Option<Storage>,
}

impl RagPipeline {
    /// Build every stage from the application config.
    ///
    /// Fails if the embedding model cannot be loaded or the index client
    /// cannot be built.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let embedder = Arc::new(Embedder::from_config(EmbeddingConfig::from(config)).await?);
        let retriever = Retriever::from_config(RetrieverConfig::from(config), Arc::clone(&embedder))?;

        let storage = if config.storage.record_runs {
            let db_path = expand_home(&config.storage.db_path);
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RuleVaultError::io(parent, e))?;
            }
            Some(Storage::open(&db_path).await?)
        } else {
            None
        };

        info!(
            model = %embedder.model_name(),
            dimension = embedder.dimension(),
            record_runs = storage.is_some(),
            "RAG pipeline initialized"
        );

        Ok(Self::from_parts(
            PdfExtractor::new(config.extraction.clone()),
            RulebookChunker::new(config.chunking.clone()),
            embedder,
            retriever,
            storage,
        ))
    }

    pub fn from_parts(
        extractor: PdfExtractor,
        chunker: RulebookChunker,
        embedder: Arc<Embedder>,
        retriever: Retriever,
        storage: Option<Storage>,
    ) -> Self {
        Self {
            extractor,
            chunker,
            embedder,
            retriever,
            storage,
        }
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    /// Ingest one rulebook PDF into the game system's collection.
    ///
    /// `book_name` defaults to the file stem. A failure is reported as
    /// [`RuleVaultError::Stage`] naming the stage that aborted.
    #[instrument(skip_all, fields(path = %pdf_path.display(), system = %game_system))]
    pub async fn process_pdf(
        &self,
        pdf_path: &Path,
        game_system: &str,
        book_name: Option<&str>,
        version: Option<&str>,
        recreate_collection: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        let book_name = match book_name {
            Some(name) => name.to_string(),
            None => pdf_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        // Run history is auxiliary: a bookkeeping failure never blocks ingestion.
        let run_id = match &self.storage {
            Some(storage) => match storage
                .insert_ingest_run(
                    &pdf_path.display().to_string(),
                    game_system,
                    Some(&book_name),
                    version,
                )
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "failed to record ingest run start");
                    None
                }
            },
            None => None,
        };

        let outcome = self
            .run_stages(pdf_path, game_system, &book_name, version, recreate_collection, progress)
            .await;

        if let (Some(storage), Some(run_id)) = (&self.storage, &run_id) {
            let recorded = match &outcome {
                Ok(report) => match serde_json::to_string(report) {
                    Ok(json) => storage.finish_ingest_run(run_id, &json).await,
                    Err(e) => Err(RuleVaultError::parse(format!("report: {e}"))),
                },
                Err(e) => {
                    storage
                        .fail_ingest_run(run_id, e.stage().map(|s| s.as_str()))
                        .await
                }
            };
            if let Err(e) = recorded {
                warn!(error = %e, run_id = %run_id, "failed to record ingest run");
            }
        }

        let report = outcome?;
        progress.done(&report);
        Ok(report)
    }

    async fn run_stages(
        &self,
        pdf_path: &Path,
        game_system: &str,
        book_name: &str,
        version: Option<&str>,
        recreate_collection: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        let start = Instant::now();
        info!(book = book_name, "processing PDF");

        // --- Stage 1: Extraction ---
        progress.phase("Extracting content");
        if !pdf_path.is_file() {
            return Err(
                RuleVaultError::extraction(pdf_path, "PDF not found").in_stage(Stage::Extraction)
            );
        }
        let fragments = self
            .extractor
            .extract(pdf_path, Some(book_name), version)
            .await
            .map_err(|e| e.in_stage(Stage::Extraction))?;
        let extraction = ExtractionReport::from_fragments(&fragments);

        // --- Stage 2: Chunking ---
        progress.phase("Chunking content");
        let chunks = self.chunker.chunk(fragments);
        let chunking = ChunkingReport::from_chunks(&chunks);

        // --- Stage 3: Embedding ---
        progress.phase("Generating embeddings");
        let records = self
            .embed_with_progress(chunks, progress)
            .await
            .map_err(|e| e.in_stage(Stage::Embedding))?;
        let embedding = EmbeddingReport {
            embeddings_generated: records.len(),
            model: self.embedder.model_name().to_string(),
            dimension: self.embedder.dimension(),
        };

        // --- Stage 4: Indexing ---
        progress.phase("Indexing vectors");
        let collection = self
            .retriever
            .create_collection(game_system, recreate_collection)
            .await
            .map_err(|e| e.in_stage(Stage::Indexing))?;
        let indexed_count = self
            .retriever
            .index(&records, game_system)
            .await
            .map_err(|e| e.in_stage(Stage::Indexing))?;

        let collection_stats = self.retriever.collection_stats(game_system).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            collection = %collection,
            indexed_count,
            elapsed_ms,
            "PDF processing complete"
        );

        Ok(IngestReport {
            pdf_path: pdf_path.display().to_string(),
            game_system: game_system.to_string(),
            book_name: book_name.to_string(),
            version: version.map(str::to_string),
            stages: StageReports {
                extraction,
                chunking,
                embedding,
                indexing: IndexingReport {
                    indexed_count,
                    collection,
                },
            },
            collection_stats,
            elapsed_ms,
        })
    }

    /// Embed in embedder-sized batches so progress can advance per batch.
    async fn embed_with_progress(
        &self,
        chunks: Vec<Chunk>,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<EmbeddingRecord>> {
        self.embedder
            .embed_batches(chunks, |done, total| progress.embedded(done, total))
            .await
    }

    /// Ranked, cited results for a query. An un-ingested system yields an
    /// empty list.
    pub async fn search(
        &self,
        query: &str,
        game_system: &str,
        limit: Option<usize>,
        filters: Option<&Metadata>,
        content_types: &[String],
    ) -> Result<Vec<FormattedResult>> {
        let content_types = parse_content_types(content_types)?;
        let results = self
            .retriever
            .search(query, game_system, limit, filters, &content_types)
            .await?;
        Ok(results.into_iter().map(FormattedResult::from).collect())
    }

    /// Content similar to `reference_text`, excluding exact matches of it.
    pub async fn find_similar(
        &self,
        reference_text: &str,
        game_system: &str,
        limit: Option<usize>,
    ) -> Result<Vec<FormattedResult>> {
        let results = self
            .retriever
            .search_similar(reference_text, game_system, limit, true)
            .await?;
        Ok(results.into_iter().map(FormattedResult::from).collect())
    }

    pub async fn stats(&self, game_system: &str) -> CollectionStats {
        self.retriever.collection_stats(game_system).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use rulevault_embedder::{EstimatedTokenizer, HashingModel, MemoryCache};
    use rulevault_extractor::fixtures::{Placed, placed, write_pdf};
    use rulevault_retriever::MemoryIndex;
    use rulevault_shared::{ChunkConfig, ContentType, ExtractionConfig, IndexBackend};
    use rulevault_storage::RunStatus;

    const DIM: usize = 48;

    fn temp_path(ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rv_core_{}.{ext}", uuid::Uuid::now_v7()))
    }

    fn pipeline(storage: Option<Storage>) -> RagPipeline {
        let embedder = Arc::new(Embedder::new(
            EmbeddingConfig {
                dimension: DIM,
                batch_size: 4,
                ..Default::default()
            },
            Arc::new(HashingModel::new(DIM)),
            Arc::new(EstimatedTokenizer),
            Arc::new(MemoryCache::new()),
        ));
        let retriever = Retriever::new(
            RetrieverConfig {
                backend: IndexBackend::Memory,
                score_threshold: -1.0,
                ..Default::default()
            },
            Arc::new(MemoryIndex::new()),
            Arc::clone(&embedder),
        );
        let chunker = RulebookChunker::new(ChunkConfig {
            chunk_size: 100,
            chunk_overlap: 20,
            ..Default::default()
        });
        RagPipeline::from_parts(
            PdfExtractor::new(ExtractionConfig::default()),
            chunker,
            embedder,
            retriever,
            storage,
        )
    }

    /// One page: a spell block above a 60-row weapon table.
    fn write_rulebook(path: &Path) {
        let spell_lines = [
            "Fireball",
            "3rd-level evocation",
            "Casting Time: 1 action",
            "Range: 150 feet",
            "Components: V, S, M",
            "Duration: Instantaneous",
            "A bright streak flashes from your pointing finger.",
        ];
        let mut items: Vec<Placed<'_>> = spell_lines
            .iter()
            .enumerate()
            .map(|(i, line)| placed(line, 72, 960 - 12 * i as i64, 10))
            .collect();

        let rows: Vec<[String; 3]> = std::iter::once([
            "Weapon".to_string(),
            "Damage".to_string(),
            "Cost".to_string(),
        ])
        .chain((1..=60).map(|n| {
            [
                format!("Training blade number {n}"),
                format!("1d{} slashing", 4 + n % 3 * 2),
                format!("{n} gp"),
            ]
        }))
        .collect();
        for (i, row) in rows.iter().enumerate() {
            let y = 800 - 12 * i as i64;
            items.push(placed(&row[0], 72, y, 8));
            items.push(placed(&row[1], 300, y, 8));
            items.push(placed(&row[2], 450, y, 8));
        }

        write_pdf(path, 1000, &items).expect("write pdf");
    }

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<String>>,
        done: Mutex<bool>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn embedded(&self, _current: usize, _total: usize) {}
        fn done(&self, _report: &IngestReport) {
            *self.done.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn ingests_spell_and_table_pdf() {
        let path = temp_path("pdf");
        write_rulebook(&path);

        let pipeline = pipeline(None);
        let progress = RecordingProgress::default();
        let report = pipeline
            .process_pdf(&path, "DnD5e", None, Some("5.1"), false, &progress)
            .await
            .expect("process pdf");

        let extraction = &report.stages.extraction;
        assert!(extraction.content_items >= 2);
        assert_eq!(extraction.content_types.get("spell"), Some(&1));
        assert_eq!(extraction.content_types.get("table"), Some(&1));

        let chunking = &report.stages.chunking;
        assert_eq!(chunking.chunk_types.get("spell"), Some(&1));
        assert!(chunking.chunk_types["table"] > 1);
        assert_eq!(report.stages.embedding.embeddings_generated, chunking.chunks_created);
        assert_eq!(report.stages.embedding.dimension, DIM);
        assert_eq!(report.stages.indexing.indexed_count, chunking.chunks_created);
        assert_eq!(report.stages.indexing.collection, "rulevault_rules_dnd5e");
        assert!(report.book_name.starts_with("rv_core_"));
        assert!(*progress.done.lock().unwrap());
        assert_eq!(progress.phases.lock().unwrap().len(), 4);

        match &report.collection_stats {
            CollectionStats::Available { vector_count, .. } => {
                assert_eq!(*vector_count as usize, chunking.chunks_created);
            }
            other => panic!("unexpected stats: {other:?}"),
        }

        let spells = pipeline
            .search("Fireball", "dnd5e", Some(50), None, &["spell".to_string()])
            .await
            .unwrap();
        assert_eq!(spells.len(), 1);
        assert!(spells[0].text.starts_with("Fireball"));
        assert!(spells[0].citation.contains(" p.1"));

        let tables = pipeline
            .search("weapon damage", "dnd5e", Some(200), None, &["table".to_string()])
            .await
            .unwrap();
        assert!(tables.len() > 1);
        for table in &tables {
            assert!(table.text.starts_with("| Weapon | Damage | Cost |\n| --- | --- | --- |\n"));
        }

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn scenario_chunks_keep_spell_whole_and_repeat_table_header() {
        let path = temp_path("pdf");
        write_rulebook(&path);
        let pipeline = pipeline(None);

        let fragments = pipeline
            .extractor
            .extract(&path, Some("Test Book"), None)
            .await
            .expect("extract");
        let chunks = pipeline.chunker.chunk(fragments);
        let _ = std::fs::remove_file(&path);

        let spells: Vec<_> = chunks
            .iter()
            .filter(|c| c.chunk_type == ContentType::Spell)
            .collect();
        assert_eq!(spells.len(), 1);
        assert!(spells[0].text.starts_with("Fireball"));
        assert!(spells[0].text.contains("Casting Time"));
        assert!(spells[0].text.contains("A bright streak flashes"));

        let tables: Vec<_> = chunks
            .iter()
            .filter(|c| c.chunk_type == ContentType::Table)
            .collect();
        assert!(tables.len() > 1);
        for table in &tables {
            let mut lines = table.text.lines();
            assert_eq!(lines.next(), Some("| Weapon | Damage | Cost |"));
            assert_eq!(lines.next(), Some("| --- | --- | --- |"));
            assert!(lines.next().is_some());
        }
    }

    #[tokio::test]
    async fn extracted_prose_keeps_lines_and_splits_at_block_paragraphs() {
        let path = temp_path("pdf");
        let items = [
            placed("Each   round of combat lasts", 72, 900, 10),
            placed("about six seconds in the world.", 72, 888, 10),
            placed("Initiative decides turn order.", 72, 840, 10),
        ];
        write_pdf(&path, 1000, &items).expect("write pdf");

        let pipeline = pipeline(None);
        let fragments = pipeline
            .extractor
            .extract(&path, None, None)
            .await
            .expect("extract");
        let _ = std::fs::remove_file(&path);

        let texts: Vec<_> = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Each round of combat lasts\nabout six seconds in the world.",
                "Initiative decides turn order.",
            ]
        );

        let chunker = RulebookChunker::new(ChunkConfig {
            chunk_size: 40,
            chunk_overlap: 0,
            min_chunk_size: 10,
            ..Default::default()
        });
        let chunks = chunker.chunk(fragments);
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Each round of combat lasts\nabout six seconds in the world.",
                "Initiative decides turn order.",
            ]
        );
    }

    #[tokio::test]
    async fn missing_pdf_fails_in_extraction_and_is_recorded() {
        let db = temp_path("db");
        let storage = Storage::open(&db).await.unwrap();
        let pipeline = pipeline(Some(storage));

        let err = pipeline
            .process_pdf(Path::new("/nonexistent/book.pdf"), "dnd5e", None, None, false, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Extraction));
        assert!(matches!(
            err,
            RuleVaultError::Stage { ref source, .. } if matches!(**source, RuleVaultError::Extraction { .. })
        ));

        let runs = pipeline
            .storage()
            .unwrap()
            .list_ingest_runs(Some("dnd5e"), 10)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].failed_stage.as_deref(), Some("extraction"));
    }

    #[tokio::test]
    async fn unwritable_run_history_does_not_block_ingestion() {
        let db = temp_path("db");
        drop(Storage::open(&db).await.unwrap());
        let readonly = Storage::open_readonly(&db).await.unwrap();

        let path = temp_path("pdf");
        write_rulebook(&path);
        let pipeline = pipeline(Some(readonly));
        let report = pipeline
            .process_pdf(&path, "dnd5e", Some("PHB"), None, false, &SilentProgress)
            .await
            .expect("ingest despite read-only history");
        let _ = std::fs::remove_file(&path);

        assert!(report.stages.indexing.indexed_count > 0);
        let runs = pipeline
            .storage()
            .unwrap()
            .list_ingest_runs(None, 10)
            .await
            .unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn corrupt_pdf_fails_in_extraction_and_is_recorded() {
        let pdf = temp_path("pdf");
        std::fs::write(&pdf, b"not a pdf").unwrap();
        let db = temp_path("db");
        let storage = Storage::open(&db).await.unwrap();

        let pipeline = pipeline(Some(storage));
        let err = pipeline
            .process_pdf(&pdf, "dnd5e", Some("Broken"), None, false, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Extraction));

        let runs = pipeline
            .storage()
            .unwrap()
            .list_ingest_runs(Some("dnd5e"), 10)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].failed_stage.as_deref(), Some("extraction"));

        let _ = std::fs::remove_file(&pdf);
    }

    #[tokio::test]
    async fn search_before_ingest_is_empty_and_rejects_bad_types() {
        let pipeline = pipeline(None);
        assert!(pipeline
            .search("fireball", "nonexistent_system", None, None, &[])
            .await
            .unwrap()
            .is_empty());

        let err = pipeline
            .search("fireball", "dnd5e", None, None, &["potion".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RuleVaultError::Validation { .. }));

        assert!(matches!(
            pipeline.stats("dnd5e").await,
            CollectionStats::Unavailable { .. }
        ));
    }
}
