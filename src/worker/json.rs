use super::Worker;
use crate::config::JsonOutputConfig;
use crate::error::Result;
use crate::json::{self, JsonDocument, SchemaValidator};
use crate::models::ScapItem;
use async_trait::async_trait;
use std::path::PathBuf;

/// Worker collecting every item into one JSON document
///
/// The document is only written in [`Worker::loop_end`], after the queue was
/// drained; an aborted run writes nothing. Every [`Worker::open`] starts a new
/// document.
pub struct JsonWriteWorker<T> {
    config: JsonOutputConfig,
    document: JsonDocument<T>,
    validator: Option<SchemaValidator>,
    written_to: Option<PathBuf>,
}

impl<T: ScapItem> JsonWriteWorker<T> {
    /// Worker writing below `config.storage_path`
    pub fn new(config: JsonOutputConfig) -> Self {
        Self {
            config,
            document: JsonDocument::new(),
            validator: None,
            written_to: None,
        }
    }

    /// Use an already compiled schema instead of `schema_path`
    pub fn with_validator(mut self, validator: SchemaValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Path of the written document, once the loop ended
    pub fn output_path(&self) -> Option<&PathBuf> {
        self.written_to.as_ref()
    }

    /// Items collected by the current run
    pub fn document(&self) -> &JsonDocument<T> {
        &self.document
    }
}

#[async_trait]
impl<T: ScapItem> Worker<T> for JsonWriteWorker<T> {
    async fn open(&mut self) -> Result<()> {
        self.document = JsonDocument::new();
        self.written_to = None;
        if self.validator.is_none() {
            if let Some(path) = &self.config.schema_path {
                self.validator = Some(SchemaValidator::from_file(path).await?);
            }
        }
        Ok(())
    }

    async fn handle_chunk(&mut self, chunk: Vec<T>) -> Result<()> {
        self.document.append(chunk);
        Ok(())
    }

    async fn loop_end(&mut self, processed: u64) -> Result<()> {
        let value = self.document.to_value()?;
        let name = json::file_name::<T>(self.config.compress);

        if let Some(validator) = &self.validator {
            validator.check(&name, &value, self.config.strict_validation)?;
        }

        let bytes = serde_json::to_vec(&value)?;
        let path =
            json::write_document::<T>(&self.config.storage_path, &bytes, self.config.compress)
                .await?;
        tracing::info!(path = %path.display(), "Wrote {} {}", processed, T::TYPE_PLURAL);
        self.written_to = Some(path);
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{Cpe, nvd_timestamp};
    use serde_json::json;
    use uuid::Uuid;

    fn cpe(n: u128) -> Cpe {
        Cpe {
            cpe_name: format!("cpe:2.3:o:acme:os:{}:*:*:*:*:*:*:*", n),
            cpe_name_id: Uuid::from_u128(n),
            deprecated: false,
            created: nvd_timestamp::parse("2021-01-01T00:00:00.000").unwrap(),
            last_modified: nvd_timestamp::parse("2021-01-01T00:00:00.000").unwrap(),
            titles: vec![],
            refs: vec![],
        }
    }

    fn config(dir: &std::path::Path) -> JsonOutputConfig {
        JsonOutputConfig {
            storage_path: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_writes_document_on_loop_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker: JsonWriteWorker<Cpe> = JsonWriteWorker::new(config(dir.path()));
        worker.open().await.unwrap();
        worker.handle_chunk(vec![cpe(1), cpe(2)]).await.unwrap();
        worker.handle_chunk(vec![cpe(3)]).await.unwrap();
        assert!(worker.output_path().is_none());

        worker.loop_end(3).await.unwrap();
        let path = worker.output_path().unwrap().clone();
        assert_eq!(path, dir.path().join("nvd-cpes.json"));

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["totalResults"], 3);
        assert_eq!(value["format"], "NVD_CPE");
        assert_eq!(value["products"].as_array().unwrap().len(), 3);
        assert_eq!(
            value["products"][2]["cpe"]["cpeNameId"],
            Uuid::from_u128(3).to_string()
        );
    }

    #[tokio::test]
    async fn test_strict_validation_blocks_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut json_config = config(dir.path());
        json_config.strict_validation = true;
        let validator = SchemaValidator::new(
            "max-one",
            &json!({"properties": {"totalResults": {"maximum": 1}}}),
        )
        .unwrap();

        let mut worker: JsonWriteWorker<Cpe> =
            JsonWriteWorker::new(json_config).with_validator(validator);
        worker.handle_chunk(vec![cpe(1), cpe(2)]).await.unwrap();

        let err = worker.loop_end(2).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(!dir.path().join("nvd-cpes.json").exists());
    }

    #[tokio::test]
    async fn test_lenient_validation_still_writes() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.json");
        std::fs::write(
            &schema_path,
            r#"{"properties": {"totalResults": {"maximum": 1}}}"#,
        )
        .unwrap();

        let mut json_config = config(dir.path());
        json_config.schema_path = Some(schema_path);
        json_config.compress = true;

        let mut worker: JsonWriteWorker<Cpe> = JsonWriteWorker::new(json_config);
        worker.open().await.unwrap();
        worker.handle_chunk(vec![cpe(1), cpe(2)]).await.unwrap();
        worker.loop_end(2).await.unwrap();

        assert!(dir.path().join("nvd-cpes.json.gz").exists());
    }
}
