//! Tool system
//!
//! The callable surface handed to an orchestration layer. Every entry point
//! returns a JSON string: data on success, or the `{"error": "..."}` sentinel
//! on any failure, so callers only ever need to check for the `"error"` key.

use crate::cache::SessionCache;
use crate::config::DataExpConfig;
use crate::dataset::{DatasetAccessor, DatasetSummary};
use crate::error::{DataExpError, Result};
use crate::execution::{PolarsSqlEngine, QueryEngine, QueryResult};
use crate::interpreter::{KeywordInterpreter, QueryPlan};
use crate::storage::{ArtifactStore, SavedArtifact};
use crate::transport;
use crate::visualization::{ChartDecision, VisualizationSelector};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub category: ToolCategory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolCategory {
    Inspection,
    Query,
    Persistence,
    Caching,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub parameter_type: ParameterType,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Number,
    Boolean,
}

/// A request to run one tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

impl ToolCall {
    pub fn new(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            parameters: HashMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

/// Answer to a plain-language question
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    #[serde(flatten)]
    pub plan: QueryPlan,
    pub rows: Vec<transport::Record>,
    pub chart: ChartDecision,
}

pub struct Toolbox {
    config: DataExpConfig,
    accessor: DatasetAccessor,
    engine: Box<dyn QueryEngine>,
    store: ArtifactStore,
    cache: Arc<SessionCache>,
    selector: VisualizationSelector,
    tools: Vec<Tool>,
}

impl Toolbox {
    /// Toolbox with its own, empty session cache
    pub fn new(config: DataExpConfig) -> Self {
        Self::with_cache(config, Arc::new(SessionCache::new()))
    }

    /// Toolbox sharing a cache constructed elsewhere
    pub fn with_cache(config: DataExpConfig, cache: Arc<SessionCache>) -> Self {
        let mut toolbox = Self {
            accessor: DatasetAccessor::new(config.sample_rows),
            engine: Box::new(PolarsSqlEngine::new()),
            store: ArtifactStore::new(config.output_dir.clone()),
            selector: VisualizationSelector::from_config(&config),
            cache,
            config,
            tools: Vec::new(),
        };
        toolbox.register_tools();
        toolbox
    }

    pub fn with_engine(mut self, engine: Box<dyn QueryEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &DataExpConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    fn register_tools(&mut self) {
        let path = || ToolParameter {
            name: "path".to_string(),
            description: "Path to the dataset file; defaults to the configured data file"
                .to_string(),
            parameter_type: ParameterType::String,
            required: false,
        };
        let required = |name: &str, description: &str| ToolParameter {
            name: name.to_string(),
            description: description.to_string(),
            parameter_type: ParameterType::String,
            required: true,
        };

        self.tools = vec![
            Tool {
                name: "describe_dataset".to_string(),
                description: "Shape, column types, null counts and sample rows of the dataset"
                    .to_string(),
                parameters: vec![path()],
                category: ToolCategory::Inspection,
            },
            Tool {
                name: "column_names".to_string(),
                description: "Header names of the dataset".to_string(),
                parameters: vec![path()],
                category: ToolCategory::Inspection,
            },
            Tool {
                name: "run_query".to_string(),
                description: "Run a read-only SQL query against the dataset, bound as table 'df'. Returns the result rows as JSON records.".to_string(),
                parameters: vec![path(), required("query", "SQL SELECT over 'df'")],
                category: ToolCategory::Query,
            },
            Tool {
                name: "save_result".to_string(),
                description: "Save JSON records to the output directory as csv, json, parquet or pickle".to_string(),
                parameters: vec![
                    required("records", "JSON array of records"),
                    required("name", "File name without extension"),
                    required("format", "One of csv, json, parquet, pickle"),
                ],
                category: ToolCategory::Persistence,
            },
            Tool {
                name: "load_result".to_string(),
                description: "Load a saved artifact and return its rows as JSON records"
                    .to_string(),
                parameters: vec![required("path", "Path of the saved file")],
                category: ToolCategory::Persistence,
            },
            Tool {
                name: "cache_result".to_string(),
                description: "Keep JSON records in the session cache under a key".to_string(),
                parameters: vec![
                    required("records", "JSON array of records"),
                    required("key", "Cache key"),
                ],
                category: ToolCategory::Caching,
            },
            Tool {
                name: "get_cached_result".to_string(),
                description: "Return the records cached under a key".to_string(),
                parameters: vec![required("key", "Cache key")],
                category: ToolCategory::Caching,
            },
        ];
    }

    // ---- typed operations ----

    fn dataset_path<'a>(&'a self, path: Option<&'a Path>) -> &'a Path {
        path.unwrap_or(&self.config.data_file)
    }

    pub fn load_dataset(&self, path: Option<&Path>) -> Result<DataFrame> {
        self.accessor.load(self.dataset_path(path))
    }

    pub fn describe(&self, path: Option<&Path>) -> Result<DatasetSummary> {
        let table = self.load_dataset(path)?;
        self.accessor.describe(&table)
    }

    pub fn columns(&self, path: Option<&Path>) -> Result<Vec<String>> {
        self.accessor.column_names(self.dataset_path(path))
    }

    pub fn query(&self, path: Option<&Path>, sql: &str) -> Result<QueryResult> {
        let table = self.load_dataset(path)?;
        self.engine.run(&table, sql)
    }

    pub fn save(&self, records_json: &str, name: &str, format: &str) -> Result<SavedArtifact> {
        let table = transport::from_transport(records_json)?;
        self.store.save(&table, name, format)
    }

    /// Run a query and save its result
    pub fn save_query(
        &self,
        path: Option<&Path>,
        sql: &str,
        name: &str,
        format: &str,
    ) -> Result<SavedArtifact> {
        let result = self.query(path, sql)?;
        self.store.save(&result.data, name, format)
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        self.store.load(path)
    }

    pub fn cache_records(&self, records_json: &str, key: &str) -> Result<(usize, usize)> {
        let table = transport::from_transport(records_json)?;
        let entry = self.cache.put(key, &table);
        info!("Cached '{}' ({} rows)", entry.key, table.height());
        Ok((table.height(), table.width()))
    }

    pub fn cached(&self, key: &str) -> Result<Arc<DataFrame>> {
        self.cache.get(key)
    }

    /// Chart decision for the result of `sql`; `question` supplies keyword context
    pub fn chart(&self, path: Option<&Path>, sql: &str, question: Option<&str>) -> Result<ChartDecision> {
        let result = self.query(path, sql)?;
        Ok(self.selector.select(&result.data, question.unwrap_or(sql)))
    }

    /// Interpret a question, run the resulting query and pick a chart for it
    pub fn ask(&self, path: Option<&Path>, question: &str) -> Result<Answer> {
        let table = self.load_dataset(path)?;
        let interpreter = KeywordInterpreter::new(crate::dataset::schema_of(&table));
        let plan = interpreter.interpret(question)?;
        let result = self.engine.run(&table, &plan.sql)?;
        let chart = self.selector.select(&result.data, question);
        Ok(Answer {
            rows: transport::table_to_records(&result.data)?,
            plan,
            chart,
        })
    }

    // ---- string entry points ----

    pub fn describe_dataset(&self, path: Option<&Path>) -> String {
        respond(self.describe(path))
    }

    pub fn column_names(&self, path: Option<&Path>) -> String {
        respond(self.columns(path))
    }

    pub fn run_query(&self, path: Option<&Path>, sql: &str) -> String {
        respond_raw(self.query(path, sql).and_then(|r| r.to_transport()))
    }

    pub fn save_result(&self, records_json: &str, name: &str, format: &str) -> String {
        respond(self.save(records_json, name, format))
    }

    pub fn load_result(&self, path: impl AsRef<Path>) -> String {
        respond_raw(self.load(path).and_then(|t| transport::to_transport(&t)))
    }

    pub fn cache_result(&self, records_json: &str, key: &str) -> String {
        respond(
            self.cache_records(records_json, key)
                .map(|(rows, columns)| json!({ "key": key, "rows": rows, "columns": columns })),
        )
    }

    pub fn get_cached_result(&self, key: &str) -> String {
        respond_raw(self.cached(key).and_then(|t| transport::to_transport(&t)))
    }

    /// Run a tool by name with JSON parameters
    pub fn dispatch(&self, call: &ToolCall) -> String {
        info!(tool = %call.tool_name, "Dispatching tool call");
        match self.dispatch_inner(call) {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %call.tool_name, "Tool call failed: {}", e);
                e.to_sentinel().to_string()
            }
        }
    }

    fn dispatch_inner(&self, call: &ToolCall) -> Result<String> {
        let tool = self
            .tool(&call.tool_name)
            .ok_or_else(|| DataExpError::NotFound(format!("Unknown tool: {}", call.tool_name)))?;

        for param in tool.parameters.iter().filter(|p| p.required) {
            if !call.parameters.contains_key(&param.name) {
                return Err(DataExpError::Parse(format!(
                    "Missing required parameter '{}' for tool '{}'",
                    param.name, tool.name
                )));
            }
        }

        let text = |name: &str| -> Result<String> {
            match call.parameters.get(name) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(other) => Ok(other.to_string()),
                None => Err(DataExpError::Parse(format!("Missing parameter '{}'", name))),
            }
        };
        let path = call
            .parameters
            .get("path")
            .and_then(Value::as_str)
            .map(PathBuf::from);
        let path = path.as_deref();

        Ok(match tool.name.as_str() {
            "describe_dataset" => self.describe_dataset(path),
            "column_names" => self.column_names(path),
            "run_query" => self.run_query(path, &text("query")?),
            "save_result" => self.save_result(&text("records")?, &text("name")?, &text("format")?),
            "load_result" => self.load_result(text("path")?),
            "cache_result" => self.cache_result(&text("records")?, &text("key")?),
            "get_cached_result" => self.get_cached_result(&text("key")?),
            other => return Err(DataExpError::NotFound(format!("Unknown tool: {}", other))),
        })
    }
}

fn respond<T: Serialize>(result: Result<T>) -> String {
    let value = result.and_then(|v| Ok(serde_json::to_value(v)?));
    match value {
        Ok(value) => value.to_string(),
        Err(e) => e.to_sentinel().to_string(),
    }
}

fn respond_raw(result: Result<String>) -> String {
    result.unwrap_or_else(|e| e.to_sentinel().to_string())
}

/// Describe the dataset at `path` as JSON, or the error sentinel
pub fn describe_dataset(path: impl AsRef<Path>) -> String {
    Toolbox::new(DataExpConfig::default()).describe_dataset(Some(path.as_ref()))
}

/// Run `sql` over the dataset at `path`; JSON records or the error sentinel
pub fn run_query(path: impl AsRef<Path>, sql: &str) -> String {
    Toolbox::new(DataExpConfig::default()).run_query(Some(path.as_ref()), sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const TITANIC: &str = "PassengerId,Survived,Pclass,Sex,Age,Fare\n\
        1,0,3,male,22,7.25\n\
        2,1,1,female,38,71.2833\n\
        3,1,3,female,26,7.925\n\
        4,1,1,female,35,53.1\n\
        5,0,3,male,35,8.05\n";

    fn setup() -> (TempDir, Toolbox) {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("titanic.csv");
        fs::write(&data, TITANIC).unwrap();
        let config = DataExpConfig::default()
            .with_data_file(&data)
            .with_output_dir(dir.path().join("output"));
        (dir, Toolbox::new(config))
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_describe_dataset_shape() {
        let (_dir, toolbox) = setup();
        let summary = parse(&toolbox.describe_dataset(None));
        assert_eq!(summary["shape"], json!([5, 6]));
        assert_eq!(summary["columns"][3], json!({ "name": "Sex", "type": "string" }));
        assert_eq!(summary["sample_data"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_run_query_returns_records() {
        let (_dir, toolbox) = setup();
        let rows = parse(&toolbox.run_query(None, "SELECT COUNT(*) as n FROM df"));
        assert_eq!(rows, json!([{ "n": 5 }]));
    }

    #[test]
    fn test_errors_become_sentinels() {
        let (dir, toolbox) = setup();
        let missing = parse(&toolbox.describe_dataset(Some(&dir.path().join("nope.csv"))));
        assert!(missing["error"].as_str().unwrap().starts_with("Not found"));

        let unsafe_query = parse(&toolbox.run_query(None, "DROP TABLE df"));
        assert!(unsafe_query.get("error").is_some());
    }

    #[test]
    fn test_save_unknown_format_sentinel() {
        let (dir, toolbox) = setup();
        let out = parse(&toolbox.save_result(r#"[{"a": 1}]"#, "x", "unknownformat"));
        assert_eq!(out, json!({ "error": "Unsupported format: unknownformat" }));
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_save_then_load_result() {
        let (dir, toolbox) = setup();
        let saved = parse(&toolbox.save_result(r#"[{"Sex": "male", "count": 2}]"#, "by_sex", "csv"));
        assert_eq!(saved["rows"], 1);
        assert_eq!(saved["columns"], 2);
        assert_eq!(saved["format"], "csv");
        let path = dir.path().join("output").join("by_sex.csv");
        assert_eq!(saved["file_path"], path.display().to_string());

        let rows = parse(&toolbox.load_result(&path));
        assert_eq!(rows, json!([{ "Sex": "male", "count": 2 }]));
    }

    #[test]
    fn test_cache_round_trip_and_miss() {
        let (_dir, toolbox) = setup();
        let cached = parse(&toolbox.cache_result(r#"[{"k": 1.5}]"#, "first"));
        assert_eq!(cached["rows"], 1);
        assert_eq!(parse(&toolbox.get_cached_result("first")), json!([{ "k": 1.5 }]));

        let miss = parse(&toolbox.get_cached_result("missing"));
        assert!(miss["error"].as_str().unwrap().contains("first"));
    }

    #[test]
    fn test_dispatch_by_name() {
        let (_dir, toolbox) = setup();
        let call = ToolCall::new("run_query").with("query", "SELECT Sex FROM df WHERE Fare > 50");
        let rows = parse(&toolbox.dispatch(&call));
        assert_eq!(rows.as_array().unwrap().len(), 2);

        let missing = parse(&toolbox.dispatch(&ToolCall::new("run_query")));
        assert!(missing["error"].as_str().unwrap().contains("query"));

        let unknown = parse(&toolbox.dispatch(&ToolCall::new("rm_rf")));
        assert!(unknown["error"].as_str().unwrap().contains("Unknown tool"));
    }

    #[test]
    fn test_ask_runs_interpreted_query_with_chart() {
        let (_dir, toolbox) = setup();
        let answer = toolbox.ask(None, "Show me survival rate by gender").unwrap();
        assert!(answer.plan.sql.starts_with("SELECT Sex, Survived"));
        assert_eq!(answer.rows.len(), 2);
        let spec = answer.chart.spec().unwrap();
        assert_eq!(spec.x, "Sex");
        assert_eq!(spec.color.as_deref(), Some("Survived"));
    }

    #[test]
    fn test_shared_cache_is_visible_across_toolboxes() {
        let cache = Arc::new(SessionCache::new());
        let a = Toolbox::with_cache(DataExpConfig::default(), Arc::clone(&cache));
        let b = Toolbox::with_cache(DataExpConfig::default(), Arc::clone(&cache));
        a.cache_result(r#"[{"x": 1}]"#, "shared");
        assert_eq!(parse(&b.get_cached_result("shared")), json!([{ "x": 1 }]));
    }
}
