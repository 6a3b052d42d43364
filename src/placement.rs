use burn::tensor::backend::Backend;

/// Device every tensor of a run is created on. Chosen once when the run starts
/// and handed to the batchers and samplers; never changed afterwards.
#[derive(Clone, Debug)]
pub struct Placement<B: Backend> {
    device: B::Device,
}

impl<B: Backend> Placement<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

impl<B: Backend> Default for Placement<B> {
    fn default() -> Self {
        Self::new(B::Device::default())
    }
}
