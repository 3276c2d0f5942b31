// ComfyUI Processor
// Upload inputs, queue the workflow, poll history, download produced images

use crate::engine::{content_type_for, ensure_success, response_content_type, transport_error};
use async_trait::async_trait;
use kiln_core::domain::JobInput;
use kiln_core::port::processor::{is_remote_url, scan_url_refs};
use kiln_core::port::{
    Artifact, InputRef, Processor, ProcessorError, ProcessorErrorKind, ProcessorOutput,
    ProcessorRequest,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const WORKFLOW_FIELD: &str = "wf_json";

#[derive(Debug, Clone)]
pub struct ComfyUiConfig {
    pub base_url: String,
    /// Timeout for a single HTTP call to the engine
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound on waiting for a queued prompt to finish
    pub max_wait: Duration,
}

impl ComfyUiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    prompt_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: String,
    #[serde(default)]
    subfolder: String,
}

/// One image listed in a history entry's outputs
#[derive(Debug, Clone, Deserialize, PartialEq)]
struct ImageRef {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default = "default_image_type")]
    kind: String,
}

fn default_image_type() -> String {
    "output".to_string()
}

pub struct ComfyUiProcessor {
    client: reqwest::Client,
    config: ComfyUiConfig,
}

impl ComfyUiProcessor {
    pub fn new(config: ComfyUiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn upload(
        &self,
        job_id: &str,
        index: usize,
        source_url: &str,
        bytes: &[u8],
    ) -> Result<String, ProcessorError> {
        let filename = format!("kiln_{}_{}.{}", job_id, index, url_extension(source_url));
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.clone())
            .mime_str(content_type_for(&filename))
            .map_err(|e| ProcessorError::invalid_input(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(self.url("/upload/image"))
            .timeout(self.config.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("upload", e))?;
        let uploaded: UploadResponse = ensure_success("upload", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("upload", e))?;

        Ok(if uploaded.subfolder.is_empty() {
            uploaded.name
        } else {
            format!("{}/{}", uploaded.subfolder, uploaded.name)
        })
    }

    async fn submit(&self, workflow: &Value, client_id: &str) -> Result<String, ProcessorError> {
        let response = self
            .client
            .post(self.url("/prompt"))
            .timeout(self.config.request_timeout)
            .json(&json!({ "prompt": workflow, "client_id": client_id }))
            .send()
            .await
            .map_err(|e| transport_error("prompt", e))?;
        let queued: PromptResponse = ensure_success("prompt", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("prompt", e))?;
        Ok(queued.prompt_id)
    }

    /// Poll `/history/{prompt_id}` until the prompt has outputs or reports an error
    async fn wait_for_images(&self, prompt_id: &str) -> Result<Vec<ImageRef>, ProcessorError> {
        let deadline = Instant::now() + self.config.max_wait;
        loop {
            let response = self
                .client
                .get(self.url(&format!("/history/{}", prompt_id)))
                .timeout(self.config.request_timeout)
                .send()
                .await
                .map_err(|e| transport_error("history", e))?;
            let history: Value = ensure_success("history", response)
                .await?
                .json()
                .await
                .map_err(|e| transport_error("history", e))?;

            if let Some(entry) = history.get(prompt_id) {
                if let Some(images) = finished_images(entry)? {
                    return Ok(images);
                }
            }

            if Instant::now() >= deadline {
                return Err(ProcessorError::new(
                    ProcessorErrorKind::Timeout,
                    format!(
                        "prompt {} not finished after {}s",
                        prompt_id,
                        self.config.max_wait.as_secs()
                    ),
                ));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn download(&self, image: &ImageRef) -> Result<(Vec<u8>, String), ProcessorError> {
        let response = self
            .client
            .get(self.url("/view"))
            .timeout(self.config.request_timeout)
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error("view", e))?;
        let response = ensure_success("view", response).await?;
        let content_type = response_content_type(&response)
            .unwrap_or_else(|| content_type_for(&image.filename).to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error("view", e))?;
        Ok((bytes.to_vec(), content_type))
    }
}

fn workflow_of(input: &JobInput) -> Result<&serde_json::Map<String, Value>, ProcessorError> {
    input
        .get(WORKFLOW_FIELD)
        .and_then(Value::as_object)
        .ok_or_else(|| {
            ProcessorError::invalid_input(format!("missing object field '{}'", WORKFLOW_FIELD))
        })
}

/// Every http(s) string inside the workflow graph, keyed by its JSON path
fn collect_workflow_urls(value: &Value, path: String, out: &mut Vec<InputRef>) {
    match value {
        Value::String(s) if is_remote_url(s) => out.push(InputRef {
            key: path,
            url: s.clone(),
        }),
        Value::Object(map) => {
            for (key, child) in map {
                collect_workflow_urls(child, format!("{}.{}", path, key), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_workflow_urls(child, format!("{}[{}]", path, i), out);
            }
        }
        _ => {}
    }
}

/// Replace URL strings in the workflow with the names the engine assigned
fn substitute_urls(value: &mut Value, uploaded: &HashMap<String, String>) {
    match value {
        Value::String(s) => {
            if let Some(name) = uploaded.get(s.as_str()) {
                *s = name.clone();
            }
        }
        Value::Object(map) => map
            .values_mut()
            .for_each(|child| substitute_urls(child, uploaded)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|child| substitute_urls(child, uploaded)),
        _ => {}
    }
}

/// `Some(images)` once the history entry is done, `None` while still running
fn finished_images(entry: &Value) -> Result<Option<Vec<ImageRef>>, ProcessorError> {
    let status = entry.get("status");
    if status.and_then(|s| s.get("status_str")).and_then(Value::as_str) == Some("error") {
        let detail = status
            .and_then(|s| s.get("messages"))
            .map(Value::to_string)
            .unwrap_or_default();
        return Err(ProcessorError::rejected(format!(
            "workflow execution failed: {}",
            crate::engine::truncate(&detail)
        )));
    }

    let completed = status
        .and_then(|s| s.get("completed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let outputs = match entry.get("outputs").and_then(Value::as_object) {
        Some(outputs) if !outputs.is_empty() => outputs,
        _ if completed => return Ok(Some(Vec::new())),
        _ => return Ok(None),
    };

    let mut images = Vec::new();
    for node in outputs.values() {
        if let Some(list) = node.get("images") {
            let refs: Vec<ImageRef> = serde_json::from_value(list.clone()).map_err(|e| {
                ProcessorError::rejected(format!("malformed history outputs: {}", e))
            })?;
            images.extend(refs);
        }
    }
    Ok(Some(images))
}

fn url_extension(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 5 => ext,
        _ => "png",
    }
}

#[async_trait]
impl Processor for ComfyUiProcessor {
    fn name(&self) -> &str {
        "comfyui"
    }

    fn input_refs(&self, input: &JobInput) -> Result<Vec<InputRef>, ProcessorError> {
        let workflow = workflow_of(input)?;
        let mut refs = scan_url_refs(input);
        for (node, value) in workflow {
            collect_workflow_urls(value, format!("{}.{}", WORKFLOW_FIELD, node), &mut refs);
        }
        Ok(refs)
    }

    async fn run(&self, request: ProcessorRequest) -> Result<ProcessorOutput, ProcessorError> {
        let mut workflow = Value::Object(workflow_of(&request.input)?.clone());

        let mut refs = Vec::new();
        collect_workflow_urls(&workflow, WORKFLOW_FIELD.to_string(), &mut refs);
        let urls: BTreeSet<String> = refs.into_iter().map(|r| r.url).collect();

        let mut uploaded = HashMap::new();
        for (index, url) in urls.iter().enumerate() {
            let bytes = request.resource(url)?;
            let name = self.upload(&request.job_id, index, url, bytes).await?;
            debug!(job_id = %request.job_id, url = %url, name = %name, "Input uploaded to engine");
            uploaded.insert(url.clone(), name);
        }
        substitute_urls(&mut workflow, &uploaded);

        let prompt_id = self.submit(&workflow, &request.job_id).await?;
        info!(job_id = %request.job_id, prompt_id = %prompt_id, "Workflow queued");

        let images = self.wait_for_images(&prompt_id).await?;
        if images.is_empty() {
            return Err(ProcessorError::new(
                ProcessorErrorKind::EmptyOutput,
                "No results generated",
            ));
        }

        let mut artifacts = Vec::with_capacity(images.len());
        for (n, image) in images.iter().enumerate() {
            let (bytes, content_type) = self.download(image).await?;
            let ext = image
                .filename
                .rsplit_once('.')
                .map(|(_, ext)| ext)
                .unwrap_or("png");
            artifacts.push(Artifact::new(format!("output_{}.{}", n, ext), bytes, content_type));
        }

        let mut output = ProcessorOutput::artifacts(artifacts);
        output
            .metadata
            .insert("prompt_id".to_string(), Value::String(prompt_id));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn input() -> JobInput {
        json!({
            "wf_json": {
                "3": {"class_type": "LoadImage", "inputs": {"image": "https://src.example.com/face.jpg"}},
                "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "kiln"}}
            }
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn processor(server: &MockServer) -> ComfyUiProcessor {
        let mut config = ComfyUiConfig::new(server.uri());
        config.poll_interval = Duration::from_millis(10);
        config.max_wait = Duration::from_secs(2);
        ComfyUiProcessor::new(config)
    }

    fn request(input: JobInput) -> ProcessorRequest {
        let mut resources = HashMap::new();
        resources.insert("https://src.example.com/face.jpg".to_string(), b"jpeg".to_vec());
        ProcessorRequest {
            job_id: "job-1".to_string(),
            workflow: "comfyui_portrait".to_string(),
            input,
            resources,
        }
    }

    #[test]
    fn test_input_refs_include_workflow_urls() {
        let server_less = ComfyUiProcessor::new(ComfyUiConfig::new("http://unused"));
        let refs = server_less.input_refs(&input()).unwrap();
        assert_eq!(
            refs,
            vec![InputRef {
                key: "wf_json.3.inputs.image".to_string(),
                url: "https://src.example.com/face.jpg".to_string(),
            }]
        );

        let err = server_less.input_refs(&JobInput::new()).unwrap_err();
        assert_eq!(err.kind, ProcessorErrorKind::InvalidInput);
    }

    #[test]
    fn test_finished_images_states() {
        assert_eq!(finished_images(&json!({"outputs": {}})).unwrap(), None);
        assert_eq!(
            finished_images(&json!({"outputs": {}, "status": {"completed": true}})).unwrap(),
            Some(vec![])
        );
        let err = finished_images(&json!({"status": {"status_str": "error", "messages": []}}))
            .unwrap_err();
        assert_eq!(err.kind, ProcessorErrorKind::EngineRejected);
    }

    #[tokio::test]
    async fn test_run_uploads_substitutes_and_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "kiln_job-1_0.jpg", "subfolder": "", "type": "input"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .and(body_partial_json(json!({
                "client_id": "job-1",
                "prompt": {"3": {"inputs": {"image": "kiln_job-1_0.jpg"}}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "p-42"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history/p-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "p-42": {
                    "status": {"status_str": "success", "completed": true},
                    "outputs": {"9": {"images": [
                        {"filename": "kiln_00001_.png", "subfolder": "", "type": "output"}
                    ]}}
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/view"))
            .and(query_param("filename", "kiln_00001_.png"))
            .and(query_param("type", "output"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"png-bytes".to_vec(), "image/png"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let output = processor(&server).run(request(input())).await.unwrap();

        assert_eq!(output.artifacts.len(), 1);
        assert_eq!(output.artifacts[0].name, "output_0.png");
        assert_eq!(output.artifacts[0].bytes, b"png-bytes");
        assert_eq!(output.artifacts[0].content_type, "image/png");
        assert_eq!(output.metadata["prompt_id"], "p-42");
    }

    #[tokio::test]
    async fn test_run_without_images_is_empty_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "p-1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history/p-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "p-1": {"status": {"completed": true}, "outputs": {}}
            })))
            .mount(&server)
            .await;

        let no_inputs = json!({"wf_json": {"9": {"inputs": {}}}})
            .as_object()
            .cloned()
            .unwrap();
        let err = processor(&server).run(request(no_inputs)).await.unwrap_err();
        assert_eq!(err.kind, ProcessorErrorKind::EmptyOutput);
        assert_eq!(err.message, "No results generated");
    }

    #[tokio::test]
    async fn test_prompt_rejected_by_engine() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "x.jpg"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid prompt"))
            .mount(&server)
            .await;

        let err = processor(&server).run(request(input())).await.unwrap_err();
        assert_eq!(err.kind, ProcessorErrorKind::EngineRejected);
        assert!(err.message.contains("invalid prompt"));
    }

    #[tokio::test]
    async fn test_history_never_finishes_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "p-9"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history/p-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let mut config = ComfyUiConfig::new(server.uri());
        config.poll_interval = Duration::from_millis(10);
        config.max_wait = Duration::from_millis(50);
        let no_inputs = json!({"wf_json": {}}).as_object().cloned().unwrap();

        let err = ComfyUiProcessor::new(config)
            .run(request(no_inputs))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProcessorErrorKind::Timeout);
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("https://a/b/face.jpg?sig=1"), "jpg");
        assert_eq!(url_extension("https://a/b/noext"), "png");
    }
}
