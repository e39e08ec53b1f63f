use serde_json::{Map, Value};

/// Outcome of every Crafty API operation. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<ResponseData>,
    pub error_code: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    Json(Value),
    Stats(ServerStats),
    Logs(LogLines),
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>, data: Option<ResponseData>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error_code: None,
        }
    }

    pub fn failure(message: impl Into<String>, error_code: Option<u16>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error_code,
        }
    }

    pub fn stats(&self) -> Option<&ServerStats> {
        match &self.data {
            Some(ResponseData::Stats(stats)) => Some(stats),
            _ => None,
        }
    }

    pub fn logs(&self) -> Option<&LogLines> {
        match &self.data {
            Some(ResponseData::Logs(lines)) => Some(lines),
            _ => None,
        }
    }

    /// Top-level fields of a raw JSON object payload, used for the generic
    /// success embed.
    pub fn json_fields(&self) -> Vec<(String, String)> {
        let Some(ResponseData::Json(Value::Object(map))) = &self.data else {
            return Vec::new();
        };
        map.iter()
            .filter(|(key, value)| key.as_str() != "server_id" && !value.is_null())
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }
}

/// Returns the first candidate key whose value is present and not null.
pub fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Typed lookups over a loosely-typed JSON object. Every getter takes the
/// ordered candidate keys and a default used when no key matches or the
/// value cannot be coerced.
struct Fields<'a>(&'a Map<String, Value>);

impl Fields<'_> {
    fn f64(&self, keys: &[&str], default: f64) -> f64 {
        first_present(self.0, keys).and_then(coerce_f64).unwrap_or(default)
    }

    fn i64(&self, keys: &[&str], default: i64) -> i64 {
        first_present(self.0, keys).and_then(coerce_i64).unwrap_or(default)
    }

    fn bool(&self, keys: &[&str], default: bool) -> bool {
        first_present(self.0, keys).and_then(coerce_bool).unwrap_or(default)
    }

    fn string(&self, keys: &[&str], default: &str) -> String {
        first_present(self.0, keys)
            .and_then(coerce_string)
            .unwrap_or_else(|| default.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerStats {
    pub server_id: String,
    pub server_name: String,
    pub running: bool,
    pub crashed: bool,
    pub updating: bool,
    pub cpu: f64,
    pub memory: String,
    pub mem_percent: f64,
    pub online_players: i64,
    pub max_players: i64,
    pub version: String,
    pub world_name: String,
    pub world_size: String,
    pub started: String,
}

impl ServerStats {
    pub fn empty(server_id: &str) -> Self {
        Self::from_object(server_id, &Map::new())
    }

    /// Builds stats from the `data` payload of `/stats`. `null` counts as an
    /// empty object; any other non-object shape is rejected.
    pub fn from_value(server_id: &str, payload: &Value) -> Result<Self, String> {
        match payload {
            Value::Object(map) => Ok(Self::from_object(server_id, map)),
            Value::Null => Ok(Self::empty(server_id)),
            other => Err(format!(
                "expected a JSON object for server statistics, got {}",
                json_kind(other)
            )),
        }
    }

    fn from_object(server_id: &str, map: &Map<String, Value>) -> Self {
        let fields = Fields(map);

        // Crafty nests the server record under `server_id`.
        let server_name = map
            .get("server_id")
            .and_then(Value::as_object)
            .and_then(|info| first_present(info, &["server_name", "name"]))
            .or_else(|| first_present(map, &["server_name"]))
            .and_then(coerce_string)
            .unwrap_or_else(|| "Unknown".to_string());

        Self {
            server_id: server_id.to_string(),
            server_name,
            running: fields.bool(&["running"], false),
            crashed: fields.bool(&["crashed"], false),
            updating: fields.bool(&["updating"], false),
            cpu: fields.f64(&["cpu"], 0.0),
            memory: fields.string(&["mem", "memory"], "0MB"),
            mem_percent: fields.f64(&["mem_percent"], 0.0),
            online_players: fields.i64(
                &["online", "online_players", "players_online", "current_players"],
                0,
            ),
            max_players: fields.i64(&["max", "max_players", "players_max", "maximum_players"], 0),
            version: fields.string(&["version"], "Unknown"),
            world_name: fields.string(&["world_name"], "world"),
            world_size: fields.string(&["world_size"], "0MB"),
            started: fields.string(&["started"], "Unknown"),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Recent console output of a server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogLines(pub Vec<String>);

const LOG_KEYS: &[&str] = &["lines", "logs", "log", "output", "data"];

impl LogLines {
    /// Accepts a list of lines, an object holding that list (or a string)
    /// under one of the known keys, or a single newline-delimited string.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(items) => Self(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.trim_end_matches(['\r', '\n']).to_string()),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect(),
            ),
            Value::String(text) => Self(
                text.lines()
                    .map(str::to_string)
                    .filter(|line| !line.trim().is_empty())
                    .collect(),
            ),
            Value::Object(map) => first_present(map, LOG_KEYS)
                .map(Self::from_value)
                .unwrap_or_default(),
            _ => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn tail(&self, count: usize) -> &[String] {
        &self.0[self.0.len().saturating_sub(count)..]
    }

    pub fn joined(&self) -> String {
        self.0.join("\n")
    }
}
