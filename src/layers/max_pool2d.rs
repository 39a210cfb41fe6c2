use super::{Layer, Pool2DConfig};
use crate::ops::{Window2d, max_pool};
use crate::{Result, Shape, Storage, Variable};

#[derive(Debug, Clone)]
pub struct MaxPool2DLayer {
    config: Pool2DConfig,
    geom: Window2d,
    input: Variable,
    output: Variable,
    /// Winning `y·W + x` per output element, `[N, C, oh, ow]` order.
    switches: Vec<usize>,
}

fn output_shape(geom: &Window2d, batch: usize) -> Result<Shape> {
    Shape::new(&[batch, geom.channels, geom.out_h, geom.out_w])
}

impl MaxPool2DLayer {
    pub fn initialize(config: Pool2DConfig, input: &Variable) -> Result<Self> {
        let geom = config.window(input.dims())?;
        let output = Variable::new(output_shape(&geom, input.shape().batch_size())?);
        Ok(Self {
            config,
            geom,
            input: input.clone(),
            switches: vec![0; output.element_count()],
            output,
        })
    }

    pub fn switches(&self) -> &[usize] {
        &self.switches
    }
}

impl Layer for MaxPool2DLayer {
    fn name(&self) -> &'static str {
        "max_pool2d"
    }

    fn input(&self) -> &Variable {
        &self.input
    }

    fn output(&self) -> &Variable {
        &self.output
    }

    fn forward(&mut self, storage: &mut Storage, _training: bool) -> Result<()> {
        max_pool::forward(
            storage,
            &self.geom,
            &self.input,
            &self.output,
            &mut self.switches,
        )
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        max_pool::backward(storage, &self.geom, &self.input, &self.output, &self.switches)
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        let geom = self.config.window(input.dims())?;
        self.output
            .set_shape(output_shape(&geom, input.shape().batch_size())?);
        self.switches.resize(self.output.element_count(), 0);
        self.geom = geom;
        self.input = input.clone();
        Ok(())
    }

    fn copy(
        &self,
        input: &Variable,
        _src: &Storage,
        _dst: &mut Storage,
    ) -> Result<Option<Box<dyn Layer>>> {
        Ok(Some(Box::new(Self::initialize(self.config, input)?)))
    }
}
