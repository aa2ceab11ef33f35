use crate::{BoxError, CaseFuture, EpochStatus, StageContext, StagedExecution};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type Params = BTreeMap<String, Value>;
pub type CaseBody = Arc<dyn Fn(StageContext, Params) -> CaseFuture>;

#[derive(Clone, Debug, PartialEq)]
struct ParamAxis {
    names: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// A staged case definition. Every instance derived from one `Arc<CaseDef>`
/// shares its identity.
pub struct CaseDef {
    name: String,
    source: String,
    deployment: bool,
    axes: Vec<ParamAxis>,
    body: CaseBody,
}

impl CaseDef {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(StageContext, Params) -> Fut + 'static,
        Fut: Future<Output = Result<(), BoxError>> + 'static,
    {
        Self {
            name: name.into(),
            source: String::new(),
            deployment: false,
            axes: Vec::new(),
            body: Arc::new(move |cx, params| Box::pin(body(cx, params))),
        }
    }

    /// Source text scanned for checkpoints.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Marks the case as a deployment case.
    pub fn deployment(mut self) -> Self {
        self.deployment = true;
        self
    }

    pub fn parametrize<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.axes.push(ParamAxis {
            names: vec![name.into()],
            rows: values.into_iter().map(|value| vec![value.into()]).collect(),
        });
        self
    }

    /// Several parameters varied together, one row per instance.
    pub fn parametrize_rows<N, R>(mut self, names: N, rows: R) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        R: IntoIterator<Item = Vec<Value>>,
    {
        self.axes.push(ParamAxis {
            names: names.into_iter().map(Into::into).collect(),
            rows: rows.into_iter().collect(),
        });
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_text(&self) -> &str {
        &self.source
    }

    pub fn is_deployment(&self) -> bool {
        self.deployment
    }

    /// Cartesian product of the parameter axes, first axis outermost.
    /// Each entry carries the rendered id fragment and the parameter values.
    pub fn parameter_sets(&self) -> Vec<(Vec<String>, Params)> {
        let mut sets = vec![(Vec::new(), Params::new())];
        for axis in &self.axes {
            let mut expanded = Vec::with_capacity(sets.len() * axis.rows.len());
            for (ids, params) in &sets {
                for (row_index, row) in axis.rows.iter().enumerate() {
                    let mut ids = ids.clone();
                    let mut params = params.clone();
                    for (name, value) in axis.names.iter().zip(row) {
                        ids.push(render_param_id(name, value, row_index));
                        params.insert(name.clone(), value.clone());
                    }
                    expanded.push((ids, params));
                }
            }
            sets = expanded;
        }
        sets
    }

    /// Plain instances, one per parameter set.
    pub fn instances(self: &Arc<Self>) -> Vec<CaseInstance> {
        self.parameter_sets()
            .into_iter()
            .map(|(ids, params)| CaseInstance::new(Arc::clone(self), ids, params, None))
            .collect()
    }

    pub(crate) fn invoke(&self, context: StageContext, params: Params) -> CaseFuture {
        (self.body)(context, params)
    }
}

impl fmt::Debug for CaseDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseDef")
            .field("name", &self.name)
            .field("deployment", &self.deployment)
            .field("axes", &self.axes)
            .finish_non_exhaustive()
    }
}

fn render_param_id(name: &str, value: &Value, row_index: usize) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "None".to_string(),
        Value::Array(_) | Value::Object(_) => format!("{name}{row_index}"),
    }
}

/// One concrete, parametrized call of a case.
#[derive(Clone, Debug)]
pub struct CaseInstance {
    pub id: String,
    pub case: Arc<CaseDef>,
    pub params: Params,
    /// Position in the `0..S` fan-out added in deploy mode.
    pub segment: Option<u32>,
}

impl CaseInstance {
    pub fn new(
        case: Arc<CaseDef>,
        mut id_parts: Vec<String>,
        params: Params,
        segment: Option<u32>,
    ) -> Self {
        if let Some(segment) = segment {
            id_parts.push(segment.to_string());
        }
        let id = if id_parts.is_empty() {
            case.name().to_string()
        } else {
            format!("{}[{}]", case.name(), id_parts.join("-"))
        };
        Self {
            id,
            case,
            params,
            segment,
        }
    }

    pub fn start(&self, epoch: EpochStatus) -> StagedExecution {
        let context = StageContext::new(epoch);
        let future = self.case.invoke(context.clone(), self.params.clone());
        StagedExecution::start(context, future)
    }
}

/// Builds a [`CaseDef`] whose source text is the stringified body, so the
/// checkpoint count is taken from the code itself.
///
/// ```
/// let case = straddle::staged_case!("counter", |cx, _params| async move {
///     cx.checkpoint().await;
///     Ok(())
/// })
/// .deployment();
/// assert_eq!(straddle::count_checkpoints(case.source_text(), "checkpoint").unwrap(), 1);
/// ```
#[macro_export]
macro_rules! staged_case {
    ($name:expr, |$cx:ident, $params:ident| $body:expr) => {
        $crate::CaseDef::new(
            $name,
            move |$cx: $crate::StageContext, $params: $crate::Params| $body,
        )
        .source(stringify!($body))
    };
    ($name:expr, |$cx:ident| $body:expr) => {
        $crate::staged_case!($name, |$cx, _params| $body)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_case(name: &str) -> CaseDef {
        CaseDef::new(name, |_cx, _params| async { Ok(()) })
    }

    #[test]
    fn parameter_sets_expected_cartesian_product_first_axis_outermost() {
        let case = noop_case("test_parametrize")
            .parametrize("param1", [1, 2])
            .parametrize("param2", [7, 8])
            .into_shared();
        let ids: Vec<String> = case
            .instances()
            .into_iter()
            .map(|instance| instance.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "test_parametrize[1-7]",
                "test_parametrize[1-8]",
                "test_parametrize[2-7]",
                "test_parametrize[2-8]",
            ]
        );
    }

    #[test]
    fn parametrize_rows_expected_values_bound_together() {
        let case = noop_case("rows")
            .parametrize_rows(["a", "b"], [vec![json!(1), json!(2)], vec![json!(3), json!(4)]])
            .into_shared();
        let instances = case.instances();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].params.get("a"), Some(&json!(3)));
        assert_eq!(instances[1].params.get("b"), Some(&json!(4)));
        assert_eq!(instances[1].id, "rows[3-4]");
    }

    #[test]
    fn instance_with_segment_expected_segment_suffix() {
        let case = noop_case("plain").into_shared();
        let instance = CaseInstance::new(Arc::clone(&case), Vec::new(), Params::new(), Some(2));
        assert_eq!(instance.id, "plain[2]");
        assert_eq!(case.instances()[0].id, "plain");
    }

    #[test]
    fn staged_case_macro_expected_source_captured() {
        let case = staged_case!("macro", |cx| async move {
            cx.checkpoint().await;
            Ok(())
        });
        assert!(case.source_text().contains("checkpoint"));
        assert!(!case.is_deployment());
    }
}
