use serde_json::Value;
use thiserror::Error;

/// 浮点数与整数的判定容差，所有 JSON 数字都可能以浮点形式出现
const INT_EPSILON: f64 = 1e-11;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JsonError {
    #[error("field is not an object")]
    NotAnObject,
    #[error("field is not an array")]
    NotAnArray,
    #[error("expected field {0} does not exist")]
    MissingField(String),
    #[error("array index {0} is out of range")]
    IndexOutOfRange(usize),
    #[error("the field is not a number")]
    NotANumber,
    #[error("the field is not an integer")]
    NotAnInteger,
    #[error("cannot convert json node to {0}")]
    Type(&'static str),
}

/// 对已解码 JSON 值的只读包装，提供点分路径访问与带类型的取值。
///
/// 路径语法：以 `.` 分隔的字段名，`[N]` 形式的段表示数组下标，
/// 空段会被跳过，因此空路径返回根节点本身。
/// 访问永远不会修改被包装的值，失败时返回可区分的错误种类。
#[derive(Debug, Clone, Copy)]
pub struct JsonNode<'a> {
    value: &'a Value,
}

impl<'a> JsonNode<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    /// 按路径取子节点，缺失与类型不符会返回不同的错误
    pub fn get(&self, path: &str) -> Result<JsonNode<'a>, JsonError> {
        let mut current = self.value;
        for segment in path.split('.') {
            if segment.is_empty() {
                continue;
            }
            if let Some(index) = parse_index(segment) {
                let array = current.as_array().ok_or(JsonError::NotAnArray)?;
                current = array.get(index).ok_or(JsonError::IndexOutOfRange(index))?;
            } else {
                let object = current.as_object().ok_or(JsonError::NotAnObject)?;
                current = object
                    .get(segment)
                    .ok_or_else(|| JsonError::MissingField(segment.to_owned()))?;
            }
        }
        Ok(JsonNode::new(current))
    }

    /// 判断路径是否可达，永远不会失败
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// 取整数值。与整数相差在容差内的浮点数（如 2.0）会被接受，2.5 这类则不会
    pub fn as_int(&self) -> Result<i64, JsonError> {
        let Value::Number(number) = self.value else {
            return Err(JsonError::NotANumber);
        };
        if let Some(integer) = number.as_i64() {
            return Ok(integer);
        }
        let float = number.as_f64().ok_or(JsonError::NotANumber)?;
        let rounded = float.round();
        if (float - rounded).abs() > INT_EPSILON {
            return Err(JsonError::NotAnInteger);
        }
        Ok(rounded as i64)
    }

    #[allow(dead_code)]
    pub fn as_float(&self) -> Result<f64, JsonError> {
        self.value.as_f64().ok_or(JsonError::Type("float"))
    }

    pub fn as_str(&self) -> Result<&'a str, JsonError> {
        self.value.as_str().ok_or(JsonError::Type("string"))
    }

    pub fn as_array(&self) -> Result<&'a Vec<Value>, JsonError> {
        self.value.as_array().ok_or(JsonError::Type("array"))
    }

    #[allow(dead_code)]
    pub fn as_object(&self) -> Result<&'a serde_json::Map<String, Value>, JsonError> {
        self.value.as_object().ok_or(JsonError::Type("object"))
    }

    pub fn get_int(&self, path: &str) -> Result<i64, JsonError> {
        self.get(path)?.as_int()
    }

    #[allow(dead_code)]
    pub fn get_float(&self, path: &str) -> Result<f64, JsonError> {
        self.get(path)?.as_float()
    }

    pub fn get_str(&self, path: &str) -> Result<&'a str, JsonError> {
        self.get(path)?.as_str()
    }

    pub fn get_array(&self, path: &str) -> Result<&'a Vec<Value>, JsonError> {
        self.get(path)?.as_array()
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    segment.strip_prefix('[')?.strip_suffix(']')?.parse().ok()
}
