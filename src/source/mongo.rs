//! MongoDB source implementation
//!
//! Documents are selected with an aggregation pipeline:
//! `$match` (filter) → `$project` (id/text/lang slots) → `$match` (resume)
//! → `$sort` by id → `$limit`.
//! Servers that refuse cursor-mode aggregation get the same pipeline as an
//! inline `aggregate` command, and the reply is served from memory.

use mongodb::bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::sync::{Client, Collection, Cursor};

use crate::config::{FieldMapping, ReaderConfig};
use crate::{Error, Result};
use super::framework::{DocumentSource, RawDocument};
use super::memory::MaterializedSource;

enum ResultSet<C = Cursor<Document>> {
    Streaming(C),
    Materialized(MaterializedSource),
}

/// Aggregation-pipeline backend over one collection
pub struct MongoSource {
    client: Option<Client>,
    collection: Option<Collection<Document>>,
    count_filter: Document,
    max_items: Option<u64>,
    results: Option<ResultSet>,
}

impl MongoSource {
    /// Connect, check the server answers, and start the aggregation
    pub fn open(config: &ReaderConfig) -> Result<Self> {
        let database = config.database.as_deref().unwrap_or_default();
        let collection_name = config.collection.as_deref().unwrap_or_default();

        let client = Client::with_uri_str(&config.uri).map_err(|e| Error::Connection(e.to_string()))?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 })
            .run()
            .map_err(|e| Error::Connection(format!("cannot reach {}: {}", config.uri, e)))?;
        tracing::info!("Connected to MongoDB database {}", database);

        let collection: Collection<Document> = db.collection(collection_name);
        let filter = parse_filter(config.query.as_deref())?;
        let mapping = config.mapping();
        let resume_after = config.resume_after.as_deref().map(resume_value);

        let pipeline = build_pipeline(
            filter.clone(),
            &mapping,
            config.language.is_none(),
            resume_after.clone(),
            config.max_items,
        );
        tracing::info!("Running aggregation on {}.{}: {:?}", database, collection_name, pipeline);

        let outcome = collection
            .aggregate(pipeline.clone())
            .batch_size(config.batch_size)
            .allow_disk_use(true)
            .run();
        let results = resolve_results(outcome, || {
            db.run_command(doc! {
                "aggregate": collection_name,
                "pipeline": pipeline.clone(),
                "allowDiskUse": true,
            })
            .run()
        })?;

        let count_filter = match resume_after {
            Some(after) => {
                let mut after_id = Document::new();
                after_id.insert(mapping.id_field.trim_start_matches('$'), doc! { "$gt": after });
                doc! { "$and": [filter, after_id] }
            }
            None => filter,
        };

        Ok(Self {
            client: Some(client),
            collection: Some(collection),
            count_filter,
            max_items: config.max_items,
            results: Some(results),
        })
    }
}

impl DocumentSource for MongoSource {
    fn backend_name(&self) -> &str {
        "mongo"
    }

    fn count(&mut self) -> Result<u64> {
        let collection = self
            .collection
            .as_ref()
            .ok_or_else(|| Error::Query("source is closed".into()))?;
        let count = collection
            .count_documents(self.count_filter.clone())
            .run()
            .map_err(classify_error)?;
        Ok(self.max_items.map_or(count, |max| count.min(max)))
    }

    fn fetch(&mut self) -> Result<Option<RawDocument>> {
        match self.results.as_mut() {
            None => Ok(None),
            Some(ResultSet::Streaming(cursor)) => match cursor.next() {
                None => Ok(None),
                Some(Ok(document)) => Ok(Some(raw_from_document(&document))),
                Some(Err(err)) => Err(classify_error(err)),
            },
            Some(ResultSet::Materialized(source)) => source.fetch(),
        }
    }

    fn close(&mut self) -> Result<()> {
        // Shutdown waits for live handles on the pool, so they go first
        self.results = None;
        self.collection = None;
        if let Some(client) = self.client.take() {
            client.shutdown().run();
            tracing::info!("MongoDB client closed");
        }
        Ok(())
    }
}

/// Build the aggregation pipeline for a reader
pub fn build_pipeline(
    filter: Document,
    mapping: &FieldMapping,
    project_language: bool,
    resume_after: Option<Bson>,
    max_items: Option<u64>,
) -> Vec<Document> {
    let mut projection = doc! {
        "_id": 0,
        "id": field_path(&mapping.id_field),
        "text": field_path(&mapping.text_field),
    };
    if project_language {
        if let Some(language) = &mapping.language_field {
            projection.insert("lang", field_path(language));
        }
    }

    let mut pipeline = vec![doc! { "$match": filter }, doc! { "$project": projection }];
    if let Some(after) = resume_after {
        pipeline.push(doc! { "$match": { "id": { "$gt": after } } });
    }
    pipeline.push(doc! { "$sort": { "id": 1 } });
    if let Some(max) = max_items {
        pipeline.push(doc! { "$limit": i64::try_from(max).unwrap_or(i64::MAX) });
    }
    pipeline
}

/// Parse an extended-JSON filter; empty means "match everything"
pub fn parse_filter(query: Option<&str>) -> Result<Document> {
    let raw = query.map(str::trim).filter(|q| !q.is_empty()).unwrap_or("{}");
    let json: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| Error::Query(format!("invalid filter {}: {}", raw, e)))?;
    match Bson::try_from(json) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(other) => Err(Error::Query(format!("filter must be a document, got {:?}", other.element_type()))),
        Err(e) => Err(Error::Query(format!("invalid filter {}: {}", raw, e))),
    }
}

/// Map a projected document onto the canonical slots
pub fn raw_from_document(document: &Document) -> RawDocument {
    RawDocument::new(
        document.get("id").and_then(bson_to_string),
        document.get("text").and_then(bson_to_string),
        document.get("lang").and_then(bson_to_string),
    )
}

fn field_path(field: &str) -> String {
    format!("${}", field.trim_start_matches('$'))
}

/// Extended JSON resume positions (e.g. `{"$oid": ".."}`), else a string
fn resume_value(raw: &str) -> Bson {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|json| Bson::try_from(json).ok())
        .unwrap_or_else(|| Bson::String(raw.to_string()))
}

fn bson_to_string(value: &Bson) -> Option<String> {
    match value {
        Bson::Null | Bson::Undefined => None,
        Bson::String(s) => Some(s.clone()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::Int32(i) => Some(i.to_string()),
        Bson::Int64(i) => Some(i.to_string()),
        // Debug keeps `1.0` apart from the integer `1`
        Bson::Double(f) => Some(format!("{:?}", f)),
        Bson::Boolean(b) => Some(b.to_string()),
        other => Some(other.clone().into_relaxed_extjson().to_string()),
    }
}

/// Serve results from a cursor-mode `aggregate`, falling back to the inline
/// command when the server rejects aggregation cursors.
///
/// The fallback result is held in memory; one warning says so. If the
/// fallback fails too, the original error is reported.
fn resolve_results<C>(
    outcome: mongodb::error::Result<C>,
    legacy: impl FnOnce() -> mongodb::error::Result<Document>,
) -> Result<ResultSet<C>> {
    match outcome {
        Ok(cursor) => Ok(ResultSet::Streaming(cursor)),
        Err(err) if matches!(err.kind.as_ref(), ErrorKind::Command(_)) => {
            let source = legacy()
                .map_err(classify_error)
                .and_then(|reply| materialize_reply(&reply))
                .map_err(|_| Error::Query(err.to_string()))?;
            tracing::warn!(
                "Server does not support cursors for aggregation pipelines; \
                 the whole result set ({} documents) is held in memory. {}",
                source.remaining(),
                err
            );
            Ok(ResultSet::Materialized(source))
        }
        Err(err) => Err(classify_error(err)),
    }
}

/// Read the `result` array of an inline `aggregate` reply, keeping its order
fn materialize_reply(reply: &Document) -> Result<MaterializedSource> {
    let result = reply
        .get_array("result")
        .map_err(|e| Error::Query(format!("unexpected aggregate reply: {}", e)))?;
    let documents: Vec<RawDocument> = result
        .iter()
        .filter_map(Bson::as_document)
        .map(raw_from_document)
        .collect();
    Ok(MaterializedSource::new("mongo", documents))
}

fn classify_error(err: mongodb::error::Error) -> Error {
    match err.kind.as_ref() {
        ErrorKind::Authentication { .. }
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::Io(_) => Error::Connection(err.to_string()),
        _ => Error::Query(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use mongodb::bson::oid::ObjectId;
    use mongodb::error::CommandError;

    const UNREACHABLE: &str = "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200";

    fn command_error() -> mongodb::error::Error {
        let command: CommandError = mongodb::bson::from_document(doc! {
            "code": 9,
            "codeName": "FailedToParse",
            "errmsg": "unrecognized field 'cursor'",
        })
        .unwrap();
        ErrorKind::Command(command).into()
    }

    fn legacy_reply() -> Document {
        doc! {
            "ok": 1,
            "result": [
                { "id": 1, "text": "first", "lang": "en" },
                { "id": 2, "text": "second" },
                { "id": 3 },
            ],
        }
    }

    fn drain_ids(results: ResultSet<()>) -> Vec<String> {
        let ResultSet::Materialized(mut source) = results else {
            panic!("expected a materialized result set");
        };
        let mut ids = Vec::new();
        while let Some(doc) = source.fetch().unwrap() {
            ids.push(doc.id().unwrap().to_string());
        }
        ids
    }

    fn mapping(language_field: Option<&str>) -> FieldMapping {
        FieldMapping {
            id_field: "doc_id".to_string(),
            text_field: "body".to_string(),
            language_field: language_field.map(String::from),
        }
    }

    #[test]
    fn test_pipeline_stage_order() {
        let filter = doc! { "status": "published" };
        let pipeline = build_pipeline(filter.clone(), &mapping(None), true, None, Some(2));

        assert_eq!(pipeline.len(), 4);
        assert_eq!(pipeline[0], doc! { "$match": filter });
        assert_eq!(
            pipeline[1],
            doc! { "$project": { "_id": 0, "id": "$doc_id", "text": "$body" } }
        );
        assert_eq!(pipeline[2], doc! { "$sort": { "id": 1 } });
        assert_eq!(pipeline[3], doc! { "$limit": 2_i64 });
    }

    #[test]
    fn test_pipeline_language_and_resume() {
        let pipeline = build_pipeline(
            Document::new(),
            &mapping(Some("meta.lang")),
            true,
            Some(Bson::String("k".into())),
            None,
        );

        let projection = pipeline[1].get_document("$project").unwrap();
        assert_eq!(projection.get_str("lang").unwrap(), "$meta.lang");
        assert_eq!(pipeline[2], doc! { "$match": { "id": { "$gt": "k" } } });
        assert_eq!(pipeline[3], doc! { "$sort": { "id": 1 } });
        assert_eq!(pipeline.len(), 4);
    }

    #[test]
    fn test_language_override_skips_language_projection() {
        let pipeline = build_pipeline(Document::new(), &mapping(Some("lang")), false, None, None);
        let projection = pipeline[1].get_document("$project").unwrap();
        assert!(!projection.contains_key("lang"));
    }

    #[test]
    fn test_dollar_prefixed_field_names() {
        let mapping = FieldMapping {
            id_field: "$_id".to_string(),
            text_field: "text".to_string(),
            language_field: None,
        };
        let pipeline = build_pipeline(Document::new(), &mapping, true, None, None);
        let projection = pipeline[1].get_document("$project").unwrap();
        assert_eq!(projection.get_str("id").unwrap(), "$_id");
        assert_eq!(projection.get_str("text").unwrap(), "$text");
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter(None).unwrap(), Document::new());
        assert_eq!(parse_filter(Some("  ")).unwrap(), Document::new());
        assert_eq!(
            parse_filter(Some(r#"{"status": "published", "tags": {"$in": ["news", "sport"]}}"#)).unwrap(),
            doc! { "status": "published", "tags": { "$in": ["news", "sport"] } }
        );
    }

    #[test]
    fn test_parse_filter_rejects_malformed() {
        assert!(matches!(parse_filter(Some("{status: ")), Err(Error::Query(_))));
        assert!(matches!(parse_filter(Some("[1, 2]")), Err(Error::Query(_))));
    }

    #[test]
    fn test_raw_from_document() {
        let oid = ObjectId::new();
        let document = doc! { "id": oid, "text": "Bon dia", "lang": "ca" };
        let raw = raw_from_document(&document);
        assert_eq!(raw.id(), Some(oid.to_hex().as_str()));
        assert_eq!(raw.text(), Some("Bon dia"));
        assert_eq!(raw.language(), Some("ca"));

        let raw = raw_from_document(&doc! { "id": 42_i64 });
        assert_eq!(raw.id(), Some("42"));
        assert_eq!(raw.text(), None);

        let raw = raw_from_document(&doc! { "text": "orphan", "id": Bson::Null });
        assert_eq!(raw.id(), None);
    }

    #[test]
    fn test_resume_value() {
        assert_eq!(resume_value("abc"), Bson::String("abc".into()));
        let oid = ObjectId::new();
        let raw = format!(r#"{{"$oid": "{}"}}"#, oid.to_hex());
        assert_eq!(resume_value(&raw), Bson::ObjectId(oid));
    }

    #[test]
    fn test_raw_from_document_keeps_double_ids_distinct() {
        assert_eq!(raw_from_document(&doc! { "id": 1.0 }).id(), Some("1.0"));
        assert_eq!(raw_from_document(&doc! { "id": 1_i32 }).id(), Some("1"));
        assert_eq!(raw_from_document(&doc! { "id": 2.5 }).id(), Some("2.5"));
    }

    #[test]
    fn test_cursor_result_streams() {
        let results = resolve_results(Ok(()), || panic!("fallback must not run")).unwrap();
        assert!(matches!(results, ResultSet::Streaming(())));
    }

    #[test]
    fn test_command_error_falls_back_to_inline_aggregate() {
        let results = resolve_results::<()>(Err(command_error()), || Ok(legacy_reply())).unwrap();
        assert_eq!(drain_ids(results), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_failed_fallback_reports_original_error() {
        let result = resolve_results::<()>(Err(command_error()), || {
            Err(mongodb::error::Error::custom("inline aggregate refused"))
        });
        match result {
            Err(Error::Query(message)) => assert!(message.contains("unrecognized field")),
            _ => panic!("expected a query error"),
        }
    }

    #[test]
    fn test_other_errors_do_not_fall_back() {
        let result = resolve_results::<()>(Err(mongodb::error::Error::custom("boom")), || {
            panic!("fallback must not run")
        });
        assert!(matches!(result, Err(Error::Query(_))));
    }

    #[test]
    fn test_materialize_reply() {
        let mut source = materialize_reply(&legacy_reply()).unwrap();
        assert_eq!(source.count().unwrap(), 3);
        let first = source.fetch().unwrap().unwrap();
        assert_eq!(first.id(), Some("1"));
        assert_eq!(first.text(), Some("first"));
        assert_eq!(first.language(), Some("en"));
        assert_eq!(source.fetch().unwrap().unwrap().language(), None);
        assert_eq!(source.fetch().unwrap().unwrap().text(), None);
        assert!(source.fetch().unwrap().is_none());

        assert!(matches!(materialize_reply(&doc! { "ok": 1 }), Err(Error::Query(_))));
    }

    #[test]
    fn test_unreachable_server_is_connection_error() {
        let config = ReaderConfig {
            backend: BackendKind::Mongo,
            uri: UNREACHABLE.to_string(),
            database: Some("corpus".to_string()),
            collection: Some("documents".to_string()),
            ..ReaderConfig::default()
        };
        assert!(matches!(MongoSource::open(&config), Err(Error::Connection(_))));
    }

    #[test]
    fn test_close_shuts_client_down_once() {
        let client = Client::with_uri_str(UNREACHABLE).unwrap();
        let collection = client.database("corpus").collection("documents");
        let mut source = MongoSource {
            client: Some(client),
            collection: Some(collection),
            count_filter: Document::new(),
            max_items: None,
            results: Some(ResultSet::Materialized(MaterializedSource::new(
                "mongo",
                vec![RawDocument::with_text("1", "a")],
            ))),
        };

        source.close().unwrap();
        assert!(source.client.is_none());
        assert!(source.fetch().unwrap().is_none());
        assert!(matches!(source.count(), Err(Error::Query(_))));
        source.close().unwrap();
    }
}
