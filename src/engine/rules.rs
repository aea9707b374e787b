//! # Update Rules
//!
//! Introspectable rule table keyed by node kind, outbound role, the ordered
//! kinds of the inbound messages and the operation. Each rule is a plain
//! function from inbound distributions (and the node's fixed parameters) to
//! the outbound distribution.
//!
//! Gaussian rules follow a least-effort policy: use the cheapest complete
//! parametrization already valid on every input, write only the slots the
//! closed form produces, and convert inputs once when nothing matches.

use crate::distribution::{
    select_parametrization, Distribution, DistributionKind, Gaussian, Parametrization,
};
use crate::error::{FgscError, Result};
use crate::metadata::{NodeKind, NodeKindTag, Role};
use crate::schedule::OperationKind;
use std::collections::HashMap;
use std::fmt;

/// Inputs handed to a rule.
///
/// `inbound` follows interface order for asymmetric kinds and
/// [`DistributionKind`] order for symmetric ones, matching the rule key.
#[derive(Debug)]
pub struct RuleCall<'a> {
    pub kind: &'a NodeKind,
    pub inbound: &'a [Distribution],
    pub fast_path_inversion: bool,
}

pub type RuleFn = fn(&RuleCall<'_>) -> Result<Distribution>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub node: NodeKindTag,
    pub outbound: Role,
    pub inbound: Vec<DistributionKind>,
    pub operation: OperationKind,
}

impl RuleKey {
    pub fn new(
        node: NodeKindTag,
        outbound: Role,
        inbound: Vec<DistributionKind>,
        operation: OperationKind,
    ) -> Self {
        Self {
            node,
            outbound,
            inbound,
            operation,
        }
    }

    fn sum_product(node: NodeKindTag, outbound: Role, inbound: &[DistributionKind]) -> Self {
        Self::new(node, outbound, inbound.to_vec(), OperationKind::SumProduct)
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inbound: Vec<String> = self.inbound.iter().map(|k| k.to_string()).collect();
        write!(
            f,
            "{}/{}({}) {}",
            self.node,
            self.outbound,
            inbound.join(", "),
            self.operation
        )
    }
}

#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub apply: RuleFn,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: HashMap<RuleKey, Rule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `apply` under `key`, replacing any previous rule.
    pub fn register(&mut self, key: RuleKey, name: &'static str, apply: RuleFn) {
        self.rules.insert(key, Rule { name, apply });
    }

    pub fn lookup(&self, key: &RuleKey) -> Option<&Rule> {
        self.rules.get(key)
    }

    pub fn contains(&self, key: &RuleKey) -> bool {
        self.rules.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Registered keys with their rule names, for inspection.
    pub fn keys(&self) -> impl Iterator<Item = (&RuleKey, &'static str)> {
        self.rules.iter().map(|(k, r)| (k, r.name))
    }

    /// The closed-form sum-product rules shipped with the crate.
    pub fn standard() -> Self {
        use DistributionKind as K;

        let mut table = Self::new();
        let out = Role::Named("out");

        table.register(
            RuleKey::sum_product(NodeKindTag::Terminal, out, &[]),
            "terminal_value",
            terminal_value,
        );

        // Equality: symmetric, inbound kinds sorted.
        let eq = |table: &mut Self, kinds: &[DistributionKind], name: &'static str| {
            table.register(
                RuleKey::sum_product(NodeKindTag::Equality, Role::Any, kinds),
                name,
                equality_product,
            );
        };
        eq(&mut table, &[K::Gaussian, K::Gaussian], "equality_gaussian");
        for other in [K::Delta, K::Gaussian, K::Gamma, K::InverseGamma, K::Beta, K::StudentsT] {
            eq(&mut table, &[K::Delta, other], "equality_delta");
        }
        eq(&mut table, &[K::Gamma, K::Gamma], "equality_gamma");
        eq(&mut table, &[K::InverseGamma, K::InverseGamma], "equality_inverse_gamma");
        eq(&mut table, &[K::Beta, K::Beta], "equality_beta");

        // Addition
        table.register(
            RuleKey::sum_product(NodeKindTag::Addition, out, &[K::Gaussian, K::Gaussian]),
            "addition_gaussian_forward",
            addition_gaussian_forward,
        );
        table.register(
            RuleKey::sum_product(NodeKindTag::Addition, out, &[K::Delta, K::Delta]),
            "addition_delta_forward",
            addition_delta_forward,
        );
        for role in ["in1", "in2"] {
            let role = Role::Named(role);
            table.register(
                RuleKey::sum_product(NodeKindTag::Addition, role, &[K::Gaussian, K::Gaussian]),
                "addition_gaussian_backward",
                addition_gaussian_backward,
            );
            table.register(
                RuleKey::sum_product(NodeKindTag::Addition, role, &[K::Delta, K::Delta]),
                "addition_delta_backward",
                addition_delta_backward,
            );
        }

        // Scale
        let input = Role::Named("in");
        table.register(
            RuleKey::sum_product(NodeKindTag::Scale, out, &[K::Gaussian]),
            "scale_gaussian_forward",
            scale_gaussian_forward,
        );
        table.register(
            RuleKey::sum_product(NodeKindTag::Scale, out, &[K::Delta]),
            "scale_delta_forward",
            scale_delta_forward,
        );
        table.register(
            RuleKey::sum_product(NodeKindTag::Scale, input, &[K::Gaussian]),
            "scale_gaussian_backward",
            scale_gaussian_backward,
        );
        table.register(
            RuleKey::sum_product(NodeKindTag::Scale, input, &[K::Delta]),
            "scale_delta_backward",
            scale_delta_backward,
        );

        // Noise: same closed form in both directions.
        for role in [input, out] {
            table.register(
                RuleKey::sum_product(NodeKindTag::Noise, role, &[K::Gaussian]),
                "noise_gaussian",
                noise_gaussian,
            );
        }

        table
    }
}

fn gaussian_at(call: &RuleCall<'_>, index: usize) -> Result<Gaussian> {
    match call.inbound.get(index) {
        Some(Distribution::Gaussian(g)) => Ok(*g),
        Some(other) => Err(FgscError::improper(format!(
            "expected a gaussian inbound, got {}",
            other.kind()
        ))),
        None => Err(FgscError::improper(format!("missing inbound #{}", index))),
    }
}

fn delta_at(call: &RuleCall<'_>, index: usize) -> Result<f64> {
    match call.inbound.get(index) {
        Some(Distribution::Delta(d)) => Ok(d.m),
        Some(other) => Err(FgscError::improper(format!(
            "expected a point mass inbound, got {}",
            other.kind()
        ))),
        None => Err(FgscError::improper(format!("missing inbound #{}", index))),
    }
}

/// Reads `(m, V)` off an input already made valid in mean/variance form.
fn mean_variance(g: &Gaussian) -> (f64, f64) {
    (g.m().unwrap_or_default(), g.v().unwrap_or_default())
}

fn terminal_value(call: &RuleCall<'_>) -> Result<Distribution> {
    match call.kind {
        NodeKind::Terminal { value } => Ok(*value),
        other => Err(FgscError::improper(format!(
            "terminal rule dispatched on {}",
            other.tag()
        ))),
    }
}

fn equality_product(call: &RuleCall<'_>) -> Result<Distribution> {
    let (a, b) = match call.inbound {
        [a, b] => (a, b),
        _ => {
            return Err(FgscError::improper(format!(
                "equality expects 2 inbound messages, got {}",
                call.inbound.len()
            )))
        }
    };
    a.product(b)?.ok_or_else(|| {
        FgscError::improper(format!("no closed-form product of {} and {}", a.kind(), b.kind()))
    })
}

fn addition_gaussian_forward(call: &RuleCall<'_>) -> Result<Distribution> {
    let mut inputs = [gaussian_at(call, 0)?, gaussian_at(call, 1)?];
    select_parametrization(&mut inputs, &[Parametrization::MeanVariance])?;
    let (m1, v1) = mean_variance(&inputs[0]);
    let (m2, v2) = mean_variance(&inputs[1]);
    Ok(Distribution::gaussian(m1 + m2, v1 + v2))
}

/// `in_k = out - in_other`; inbound is `[other input, out]`.
fn addition_gaussian_backward(call: &RuleCall<'_>) -> Result<Distribution> {
    let mut inputs = [gaussian_at(call, 0)?, gaussian_at(call, 1)?];
    select_parametrization(&mut inputs, &[Parametrization::MeanVariance])?;
    let (m_other, v_other) = mean_variance(&inputs[0]);
    let (m_out, v_out) = mean_variance(&inputs[1]);
    Ok(Distribution::gaussian(m_out - m_other, v_out + v_other))
}

fn addition_delta_forward(call: &RuleCall<'_>) -> Result<Distribution> {
    Ok(Distribution::delta(delta_at(call, 0)? + delta_at(call, 1)?))
}

fn addition_delta_backward(call: &RuleCall<'_>) -> Result<Distribution> {
    Ok(Distribution::delta(delta_at(call, 1)? - delta_at(call, 0)?))
}

fn gain(call: &RuleCall<'_>) -> Result<f64> {
    match call.kind {
        NodeKind::Scale { gain } => Ok(*gain),
        other => Err(FgscError::improper(format!(
            "scale rule dispatched on {}",
            other.tag()
        ))),
    }
}

/// Inverse of `gain` when it can be formed.
fn invert_gain(gain: f64) -> Option<f64> {
    let inv = 1.0 / gain;
    (gain != 0.0 && inv.is_finite()).then_some(inv)
}

fn scale_gaussian_forward(call: &RuleCall<'_>) -> Result<Distribution> {
    let a = gain(call)?;
    let mut inputs = [gaussian_at(call, 0)?];
    let form = select_parametrization(
        &mut inputs,
        &[Parametrization::MeanVariance, Parametrization::Canonical],
    )?;
    let [x] = inputs;
    if form == Parametrization::Canonical {
        if let Some(inv) = invert_gain(a) {
            let (xi, w) = (x.xi().unwrap_or_default(), x.w().unwrap_or_default());
            return Ok(Distribution::Gaussian(Gaussian::from_canonical(xi * inv, w * inv * inv)));
        }
    }
    let (m, v) = mean_variance(&x.converted(Parametrization::MeanVariance)?);
    Ok(Distribution::gaussian(a * m, a * a * v))
}

fn scale_delta_forward(call: &RuleCall<'_>) -> Result<Distribution> {
    Ok(Distribution::delta(gain(call)? * delta_at(call, 0)?))
}

/// Canonical form needs no inverse: `xi_in = a xi_out`, `W_in = a^2 W_out`.
/// Inputs carrying only `(m, V)` take the inverse-gain fast path when the gain
/// can be inverted, and are converted to canonical form otherwise.
fn scale_gaussian_backward(call: &RuleCall<'_>) -> Result<Distribution> {
    let a = gain(call)?;
    let y = gaussian_at(call, 0)?;

    if !y.is_valid(Parametrization::Canonical)
        && y.is_valid(Parametrization::MeanVariance)
        && call.fast_path_inversion
    {
        match invert_gain(a) {
            Some(inv) => {
                let (m, v) = mean_variance(&y);
                return Ok(Distribution::gaussian(m * inv, v * inv * inv));
            }
            None => tracing::warn!(
                "[FGSC] NonInvertibleParameter: gain {} has no inverse, using canonical rule",
                a
            ),
        }
    }

    let y = y.converted(Parametrization::Canonical)?;
    let (xi, w) = (y.xi().unwrap_or_default(), y.w().unwrap_or_default());
    Ok(Distribution::Gaussian(Gaussian::from_canonical(a * xi, a * a * w)))
}

fn scale_delta_backward(call: &RuleCall<'_>) -> Result<Distribution> {
    let a = gain(call)?;
    let inv = invert_gain(a).ok_or_else(|| {
        FgscError::improper(format!("gain {} cannot be inverted for a point mass", a))
    })?;
    Ok(Distribution::delta(delta_at(call, 0)? * inv))
}

fn noise_gaussian(call: &RuleCall<'_>) -> Result<Distribution> {
    let s = match call.kind {
        NodeKind::Noise { variance } => *variance,
        other => {
            return Err(FgscError::improper(format!(
                "noise rule dispatched on {}",
                other.tag()
            )))
        }
    };
    let mut inputs = [gaussian_at(call, 0)?];
    select_parametrization(&mut inputs, &[Parametrization::MeanVariance])?;
    let (m, v) = mean_variance(&inputs[0]);
    Ok(Distribution::gaussian(m, v + s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    fn call<'a>(kind: &'a NodeKind, inbound: &'a [Distribution]) -> RuleCall<'a> {
        RuleCall {
            kind,
            inbound,
            fast_path_inversion: true,
        }
    }

    fn mean_var(d: &Distribution) -> (f64, f64) {
        match d {
            Distribution::Gaussian(g) => (g.mean().unwrap(), g.variance().unwrap()),
            other => panic!("expected gaussian, got {}", other),
        }
    }

    #[test]
    fn standard_table_keys_are_introspectable() {
        let table = RuleTable::standard();
        let key = RuleKey::new(
            NodeKindTag::Scale,
            Role::Named("out"),
            vec![DistributionKind::Delta],
            OperationKind::SumProduct,
        );
        assert_eq!(table.lookup(&key).map(|r| r.name), Some("scale_delta_forward"));
        assert!(table.keys().any(|(_, name)| name == "equality_gaussian"));
        assert_eq!(key.to_string(), "scale/out(delta) sum_product");
    }

    #[test]
    fn forward_scale_writes_only_mean_variance() {
        let kind = NodeKind::Scale { gain: 2.0 };
        let inbound = [Distribution::gaussian(1.0, 1.0)];
        let out = scale_gaussian_forward(&call(&kind, &inbound)).unwrap();
        match out {
            Distribution::Gaussian(g) => {
                assert_eq!((g.m(), g.v()), (Some(2.0), Some(4.0)));
                assert!(g.w().is_none() && g.xi().is_none());
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn forward_scale_stays_canonical() {
        let kind = NodeKind::Scale { gain: 2.0 };
        let inbound = [Distribution::Gaussian(Gaussian::from_canonical(4.0, 2.0))];
        let out = scale_gaussian_forward(&call(&kind, &inbound)).unwrap();
        match out {
            Distribution::Gaussian(g) => {
                assert!(g.is_valid(Parametrization::Canonical));
                assert!(g.m().is_none());
                assert!((g.mean().unwrap() - 4.0).abs() < 1e-12);
                assert!((g.variance().unwrap() - 2.0).abs() < 1e-12);
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn backward_scale_fast_path_and_fallback_agree() {
        let kind = NodeKind::Scale { gain: 2.0 };
        let inbound = [Distribution::gaussian(4.0, 8.0)];
        let fast = scale_gaussian_backward(&call(&kind, &inbound)).unwrap();
        let general = scale_gaussian_backward(&RuleCall {
            fast_path_inversion: false,
            ..call(&kind, &inbound)
        })
        .unwrap();

        let (m_fast, v_fast) = mean_var(&fast);
        let (m_gen, v_gen) = mean_var(&general);
        assert!((m_fast - 2.0).abs() < 1e-12 && (v_fast - 2.0).abs() < 1e-12);
        assert!((m_fast - m_gen).abs() < 1e-12 && (v_fast - v_gen).abs() < 1e-12);
    }

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn backward_scale_zero_gain_falls_back() {
        let kind = NodeKind::Scale { gain: 0.0 };
        let inbound = [Distribution::gaussian(4.0, 8.0)];
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();

        let out = tracing::subscriber::with_default(subscriber, || {
            scale_gaussian_backward(&call(&kind, &inbound))
        })
        .unwrap();

        let text = logs.text();
        assert!(text.contains("WARN"), "{}", text);
        assert!(text.contains("NonInvertibleParameter: gain 0 has no inverse"), "{}", text);
        match out {
            Distribution::Gaussian(g) => {
                assert_eq!(g.w(), Some(0.0));
                assert_eq!(g.xi(), Some(0.0));
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn backward_delta_zero_gain_is_improper() {
        let kind = NodeKind::Scale { gain: 0.0 };
        let inbound = [Distribution::delta(1.0)];
        let err = scale_delta_backward(&call(&kind, &inbound)).unwrap_err();
        assert!(matches!(err, FgscError::ImproperValue(_)));
    }

    #[test]
    fn addition_backward_subtracts() {
        let kind = NodeKind::Addition;
        let inbound = [Distribution::gaussian(1.0, 1.0), Distribution::gaussian(5.0, 2.0)];
        let (m, v) = mean_var(&addition_gaussian_backward(&call(&kind, &inbound)).unwrap());
        assert!((m - 4.0).abs() < 1e-12);
        assert!((v - 3.0).abs() < 1e-12);
    }

    #[test]
    fn noise_adds_variance() {
        let kind = NodeKind::Noise { variance: 0.5 };
        let inbound = [Distribution::gaussian(1.0, 1.0)];
        let (m, v) = mean_var(&noise_gaussian(&call(&kind, &inbound)).unwrap());
        assert_eq!((m, v), (1.0, 1.5));
    }
}
