use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// A step's parameter object.
///
/// This is the serializable unit that gets persisted per
/// (model instance, flow key, step key) and handed to step handlers after
/// merging: declared defaults first, persisted params over them, and
/// invocation-time params over both.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StepParams {
    /// The inner JSON value, normally an object
    pub value: Value,
}

impl Default for StepParams {
    fn default() -> Self {
        Self::empty()
    }
}

impl StepParams {
    /// Create step params from a JSON value
    #[inline]
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Create an empty params object
    #[inline]
    pub fn empty() -> Self {
        Self {
            value: Value::Object(serde_json::Map::new()),
        }
    }

    /// Get the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Look up a single parameter by name
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.value.get(name)
    }

    /// Look up a string parameter by name
    #[inline]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.value.get(name).and_then(Value::as_str)
    }

    /// Look up a boolean parameter by name
    #[inline]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.value.get(name).and_then(Value::as_bool)
    }

    /// Whether the params object carries no entries at all
    pub fn is_empty(&self) -> bool {
        match &self.value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Deep-merge these params over `base`: entries present here win,
    /// nested objects merge key by key, and an explicit `null` entry
    /// overrides the base entry (clearing a declared default). A wholly
    /// `Null` params layer stands for an absent layer and leaves `base`
    /// untouched.
    pub fn merged_over(&self, base: &StepParams) -> StepParams {
        if self.value.is_null() {
            return base.clone();
        }
        let mut merged = base.value.clone();
        deep_merge(&mut merged, &self.value);
        StepParams::new(merged)
    }

    /// Deserialize the params into a typed structure
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.value.clone())
    }

    /// Create params from a serializable value
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(serde_json::to_value(value)?))
    }
}

/// Recursively merge `over` into `base`; non-object values replace
/// wholesale, `null` included.
fn deep_merge(base: &mut Value, over: &Value) {
    match (base, over) {
        (Value::Object(base_map), Value::Object(over_map)) => {
            for (key, over_value) in over_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, over_value),
                    None => {
                        base_map.insert(key.clone(), over_value.clone());
                    }
                }
            }
        }
        (base, over) => {
            *base = over.clone();
        }
    }
}
