use std::{convert::TryFrom, path::Path, sync::Arc};

use tch::{self, Device, Kind, Tensor};

use crate::{
    model::{InferenceBackend, InferenceError, ModelError},
    tensor::{HostTensor, TensorLedger},
};

/// TorchScript-backed hand-sign detector.
///
/// The module is expected to take an NCHW float batch and return the raw
/// `[1, 4 + C, N]` prediction tensor.
pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    input_size: i64,
}

impl TorchDetector {
    /// Load a TorchScript module onto `device`.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: u32,
    ) -> Result<Self, ModelError> {
        let module = tch::CModule::load_on_device(model_path.as_ref(), device)
            .map_err(|err| ModelError::Parse(err.to_string()))?;
        Ok(Self {
            module,
            device,
            input_size: input_size as i64,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn run(&self, input: &HostTensor) -> Result<(Vec<usize>, Vec<f32>), tch::TchError> {
        tch::no_grad(|| {
            let s = self.input_size;
            let batch = Tensor::from_slice(input.data())
                .view([1, s, s, 3])
                .permute([0, 3, 1, 2])
                .to_kind(Kind::Float)
                .to_device(self.device);
            let output = self.module.forward_ts(&[batch])?;
            let output = output.to_device(Device::Cpu).to_kind(Kind::Float).contiguous();
            let shape = output.size().iter().map(|&d| d as usize).collect();
            let flat = Vec::<f32>::try_from(&output.flatten(0, -1))?;
            Ok((shape, flat))
        })
    }
}

impl InferenceBackend for TorchDetector {
    fn forward(
        &mut self,
        input: &HostTensor,
        ledger: &Arc<TensorLedger>,
    ) -> Result<HostTensor, InferenceError> {
        let s = self.input_size as usize;
        let expected = vec![1, s, s, 3];
        if input.shape() != expected.as_slice() {
            return Err(InferenceError::InputShape {
                expected,
                actual: input.shape().to_vec(),
            });
        }
        // Every tch tensor created by `run` is dropped before it returns.
        let (shape, data) = self
            .run(input)
            .map_err(|err| InferenceError::Backend(err.to_string()))?;
        Ok(ledger.allocate(shape, data)?)
    }

    fn describe(&self) -> String {
        format!("torchscript on {:?} ({}px)", self.device, self.input_size)
    }
}
