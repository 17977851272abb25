use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod schemas;

/// SMI TrafficSplit, as served by `split.smi-spec.io`.
///
/// Decoding is tolerant of the two weight encodings found in the wild:
/// v1alpha2 serves weights as plain integers, v1alpha1 as decimal strings.
#[derive(CustomResource, Deserialize, Serialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "split.smi-spec.io",
    version = "v1alpha2",
    kind = "TrafficSplit",
    plural = "trafficsplits",
    namespaced
)]
pub struct TrafficSplitSpec {
    /// The root service that clients address.
    pub service: String,
    /// The services to distribute traffic across, with their weights.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<TrafficSplitBackend>,
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Clone, JsonSchema)]
pub struct TrafficSplitBackend {
    /// The backing service the weight applies to.
    pub service: String,
    #[serde(deserialize_with = "weight_de")]
    #[schemars(schema_with = "schemas::weight")]
    pub weight: u32,
}

fn weight_de<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Number(u32),
        Decimal(String),
    }

    match Encoded::deserialize(deserializer)? {
        Encoded::Number(weight) => Ok(weight),
        Encoded::Decimal(repr) => repr.parse().map_err(|_| {
            serde::de::Error::invalid_value(
                serde::de::Unexpected::Str(&repr),
                &"a base-10 integer weight",
            )
        }),
    }
}
