use std::path::PathBuf;

use async_stream::try_stream;
use futures::Stream;
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::pipeline::{Envelope, PipelineError, Source};

/// Reads provider exports saved to disk, or from stdin when the path is `-`.
///
/// Accepted layouts:
/// - a single export document;
/// - a JSON array of documents, one per connection;
/// - documents one after another, e.g. NDJSON or the printer's own output.
pub struct ExportFileSource {
    path: PathBuf,
}

impl ExportFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<String, PipelineError> {
        if self.path.as_os_str() == "-" {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .map_err(|e| PipelineError::Source(format!("failed to read stdin: {e}")))?;
            return Ok(text);
        }

        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PipelineError::Source(format!("failed to read {}: {e}", self.path.display())))
    }
}

/// Split file contents into individual documents.
///
/// Documents may follow each other with any whitespace in between, which
/// covers NDJSON as well as the printer's pretty output. A top-level array is
/// expanded into its elements. Reading stops at the first syntax error since
/// the following document boundaries can no longer be trusted.
fn split_documents(text: &str) -> Vec<Result<Value, PipelineError>> {
    let mut docs = Vec::new();
    for item in serde_json::Deserializer::from_str(text).into_iter::<Value>() {
        match item {
            Ok(Value::Array(batch)) => docs.extend(batch.into_iter().map(Ok)),
            Ok(doc) => docs.push(Ok(doc)),
            Err(e) => {
                docs.push(Err(PipelineError::Source(format!("invalid export JSON: {e}"))));
                break;
            }
        }
    }
    if docs.is_empty() {
        docs.push(Err(PipelineError::Source("export contains no documents".to_string())));
    }
    docs
}

#[async_trait::async_trait]
impl Source<Value> for ExportFileSource {
    async fn stream(&self) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<Value>, PipelineError>> + Send>> {
        let contents = self.read_all().await;
        let s = try_stream! {
            let text = contents?;
            for doc in split_documents(&text) {
                match doc {
                    Ok(payload) => {
                        yield Envelope::new(payload);
                    }
                    Err(e) => {
                        metrics::counter!("export_file_parse_errors_total").increment(1);
                        Err(e)?
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode::decode, pipeline::Sink, sinks::Printer};
    use futures::StreamExt;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use usage_client::domain::UsageDocument;

    #[test]
    fn single_document_is_one_item() {
        let docs = split_documents(r#"{"unit":"WH","resolution":"Days","values":[]}"#);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].is_ok());
    }

    #[test]
    fn array_yields_one_item_per_connection() {
        let docs = split_documents(
            r#"[{"unit":"WH","resolution":"Days","market":"ELECTRICITY","values":[]},
                {"unit":"M3","resolution":"Days","market":"GAS","values":[]}]"#,
        );
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].as_ref().unwrap()["market"], "GAS");
    }

    #[test]
    fn ndjson_lines_are_split_until_the_first_bad_line() {
        let text = "{\"unit\":\"WH\",\"resolution\":\"Days\",\"values\":[]}\n\nnot json\n{\"unit\":\"WH\",\"resolution\":\"Days\",\"values\":[]}\n";
        let docs = split_documents(text);
        assert_eq!(docs.len(), 2);
        assert!(docs[0].is_ok());
        assert!(matches!(&docs[1], Err(PipelineError::Source(msg)) if msg.contains("line 3")));
    }

    #[test]
    fn garbage_is_a_source_error() {
        let docs = split_documents("{ nope");
        assert!(matches!(docs.as_slice(), [Err(PipelineError::Source(_))]));

        let docs = split_documents("  \n");
        assert!(matches!(docs.as_slice(), [Err(PipelineError::Source(_))]));
    }

    #[tokio::test]
    async fn printed_documents_read_back_as_the_same_documents() {
        let first = decode(&json!({
            "unit": "WH",
            "resolution": "Days",
            "market": "ELECTRICITY",
            "values": [
                {"time": "2022-10-20T00:00:00Z", "tag": "Measured", "consumption": 9618.0, "production": 0.0},
                {"time": "2022-10-21T00:00:00Z", "tag": "Estimated", "consumption": 8100.5}
            ]
        }))
        .unwrap();
        let second = decode(&json!({
            "unit": "M3",
            "resolution": "Days",
            "market": "GAS",
            "values": [{"time": "2022-10-20T00:00:00Z", "tag": "Measured", "consumption": 3.25}]
        }))
        .unwrap();

        for pretty in [true, false] {
            let printer = Printer::new(Vec::new(), pretty);
            let cancel = CancellationToken::new();
            printer.write(&first, &cancel).await.unwrap();
            printer.write(&second, &cancel).await.unwrap();
            let text = String::from_utf8(printer.into_inner()).unwrap();

            let reread: Vec<UsageDocument> = split_documents(&text)
                .into_iter()
                .map(|doc| decode(&doc.unwrap()).unwrap())
                .collect();
            assert_eq!(reread, vec![first.clone(), second.clone()], "pretty={pretty}");
        }
    }

    #[tokio::test]
    async fn missing_file_surfaces_as_stream_error() {
        let source = ExportFileSource::new("/definitely/not/here.json");
        let items: Vec<_> = source.stream().await.collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn reads_documents_from_disk() {
        let path = std::env::temp_dir().join(format!("usage-export-{}.json", std::process::id()));
        tokio::fs::write(
            &path,
            r#"[{"unit":"WH","resolution":"Days","values":[{"time":"2022-10-20T00:00:00Z","tag":"Measured","consumption":1.0}]}]"#,
        )
        .await
        .unwrap();

        let items: Vec<_> = ExportFileSource::new(&path).stream().await.collect().await;
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(items.len(), 1);
        let env = items.into_iter().next().unwrap().unwrap();
        assert_eq!(env.payload["unit"], "WH");
    }
}
