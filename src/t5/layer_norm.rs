// Copyright 2018 Mesh TensorFlow authors, T5 Authors and HuggingFace Inc. team.
// Copyright 2020 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::borrow::Borrow;
use tch::nn::{Init, Module};
use tch::{nn, Kind, Tensor};

/// Root-mean-square layer norm: scale only, no bias and no mean subtraction.
#[derive(Debug)]
pub struct T5LayerNorm {
    weight: Tensor,
    epsilon: f64,
}

impl T5LayerNorm {
    pub fn new<'p, P>(p: P, hidden_size: i64, epsilon: f64) -> T5LayerNorm
    where
        P: Borrow<nn::Path<'p>>,
    {
        let weight = p.borrow().var("weight", &[hidden_size], Init::Const(1.0));
        T5LayerNorm { weight, epsilon }
    }
}

impl Module for T5LayerNorm {
    fn forward(&self, x: &Tensor) -> Tensor {
        let input_type = x.kind();
        // variance accumulated in f32 for half precision inputs
        let variance = x.to_kind(Kind::Float).pow_tensor_scalar(2.0_f64).mean_dim(
            [-1].as_slice(),
            true,
            Kind::Float,
        );
        let x = x.to_kind(Kind::Float) * (variance + self.epsilon).rsqrt();
        if input_type != Kind::Float {
            (&self.weight * x).to_kind(input_type)
        } else {
            &self.weight * x
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::Device;

    #[test]
    fn normalizes_to_unit_rms() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer_norm = T5LayerNorm::new(vs.root() / "layer_norm", 4, 1e-6);
        let input = Tensor::from_slice(&[2.0f32, -2.0, 2.0, -2.0]).view([1, 4]);

        let output = input.apply(&layer_norm);

        let values = Vec::<f32>::try_from(output.view([-1])).unwrap();
        for (value, expected) in values.iter().zip([1.0f32, -1.0, 1.0, -1.0]) {
            assert!((value - expected).abs() < 1e-4);
        }
    }
}
