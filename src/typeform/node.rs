use serde_json::Value;

/// Borrowed view over a loosely structured JSON document.
///
/// Every accessor defaults on missing keys or mismatched types instead of
/// failing, so a `Node` can be walked arbitrarily deep without checks.
#[derive(Debug, Clone, Copy)]
pub struct Node<'a>(Option<&'a Value>);

impl<'a> Node<'a> {
    pub fn new(value: &'a Value) -> Self {
        Node(Some(value))
    }

    pub fn missing() -> Self {
        Node(None)
    }

    pub fn value(&self) -> Option<&'a Value> {
        self.0.filter(|v| !v.is_null())
    }

    pub fn is_object(&self) -> bool {
        matches!(self.0, Some(Value::Object(_)))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.0, Some(Value::Array(_)))
    }

    pub fn get(&self, key: &str) -> Node<'a> {
        Node(self.0.and_then(|v| v.get(key)))
    }

    pub fn str(&self, key: &str) -> Option<&'a str> {
        self.get(key).as_str()
    }

    pub fn str_or(&self, key: &str, default: &'a str) -> &'a str {
        self.str(key).unwrap_or(default)
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.str(key).map(str::to_string)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).0.and_then(Value::as_bool).unwrap_or(default)
    }

    /// Integer at `key`; floats are truncated toward zero.
    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).as_i64().unwrap_or(default)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).0.and_then(Value::as_f64)
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.0.and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        let v = self.0?;
        v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
    }

    /// Array elements at `key`; empty when absent or not an array.
    pub fn items(&self, key: &str) -> impl Iterator<Item = Node<'a>> {
        self.get(key).elements()
    }

    pub fn elements(&self) -> impl Iterator<Item = Node<'a>> {
        self.0
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(Node::new)
    }

    pub fn first(&self, key: &str) -> Node<'a> {
        self.items(key).next().unwrap_or_else(Node::missing)
    }
}
