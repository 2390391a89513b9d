/// Collects a DOM list (anything with `length()` and `get(u32) -> Option<T>`)
/// into a rust collection.
macro_rules! to_collection {
    ($from:expr => $to:ty : $push:ident) => {{
        let from = $from;
        let mut to = <$to>::new();
        for i in 0..from.length() {
            if let Some(item) = from.get(i) {
                to.$push(item);
            }
        }
        to
    }};
}

/// Builds a JS array out of anything iterable whose items convert into
/// `JsValue`.
macro_rules! from_collection {
    ($from:expr) => {{
        let array = js_sys::Array::new();
        for item in $from {
            array.push(&wasm_bindgen::JsValue::from(item));
        }
        array
    }};
}
