use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::checkpoint::Checkpoint;
use crate::float::Float;
use crate::parameter::{reshape, Parameter, ParameterOptions};

// Tape identity is process-local and never serialized; a deserialized
// parameter starts unregistered.

impl<F: Float + Serialize> Serialize for Parameter<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Parameter", 3)?;
        s.serialize_field("name", &self.name())?;
        s.serialize_field("shape", self.shape())?;
        s.serialize_field("values", &self.to_list())?;
        s.end()
    }
}

impl<'de, F: Float + Deserialize<'de>> Deserialize<'de> for Parameter<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct ParameterData<F> {
            #[serde(default)]
            name: Option<String>,
            shape: Vec<usize>,
            values: Vec<F>,
        }

        let data = ParameterData::<F>::deserialize(deserializer)?;
        let values = reshape(data.values, &data.shape).map_err(serde::de::Error::custom)?;
        Ok(Parameter::with_options(
            values,
            ParameterOptions {
                name: data.name,
                ..Default::default()
            },
        ))
    }
}

impl<F: Float + Serialize> Serialize for Checkpoint<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let values: Vec<F> = self.values().iter().copied().collect();
        let mut s = serializer.serialize_struct("Checkpoint", 2)?;
        s.serialize_field("shape", self.shape())?;
        s.serialize_field("values", &values)?;
        s.end()
    }
}

impl<'de, F: Float + Deserialize<'de>> Deserialize<'de> for Checkpoint<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct CheckpointData<F> {
            shape: Vec<usize>,
            values: Vec<F>,
        }

        let data = CheckpointData::<F>::deserialize(deserializer)?;
        let values = reshape(data.values, &data.shape).map_err(serde::de::Error::custom)?;
        Ok(Checkpoint::new(values))
    }
}
