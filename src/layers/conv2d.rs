use rand::rngs::StdRng;

use super::{Conv2DConfig, Layer, copy_state};
use crate::init::Fans;
use crate::ops::Window2d;
use crate::ops::convolution::{self, ConvVariables};
use crate::{Error, Init, Result, Shape, Storage, Variable};

/// GEMM-lowered 2-D convolution over `[N, C, H, W]` inputs.
#[derive(Debug, Clone)]
pub struct Conv2DLayer {
    config: Conv2DConfig,
    geom: Window2d,
    input: Variable,
    weights: Variable,
    bias: Variable,
    columns: Variable,
    filter_major: Variable,
    output: Variable,
}

/// Shapes of the per-batch variables for a given geometry.
struct BatchShapes {
    columns: Shape,
    filter_major: Shape,
    output: Shape,
}

impl BatchShapes {
    fn new(config: &Conv2DConfig, geom: &Window2d, batch: usize) -> Result<Self> {
        let np = batch * geom.positions();
        Ok(Self {
            columns: Shape::new(&[np, geom.patch_len()])?,
            filter_major: Shape::new(&[config.filters, np])?,
            output: Shape::new(&[batch, config.filters, geom.out_h, geom.out_w])?,
        })
    }
}

impl Conv2DLayer {
    pub fn initialize(
        config: Conv2DConfig,
        input: &Variable,
        storage: &mut Storage,
        rng: &mut StdRng,
        init: Init,
    ) -> Result<Self> {
        let geom = config.window(input.dims())?;
        let receptive = config.filter_h * config.filter_w;
        let weights = Variable::trainable(Shape::new(&[config.filters, geom.patch_len()])?);
        let bias = Variable::trainable(Shape::new(&[config.filters])?);

        let sampler = init.sampler(Fans::new(geom.patch_len(), config.filters * receptive))?;
        storage.assign_value_with(&weights, || sampler.sample(&mut *rng));
        storage.value_mut(&bias).fill(0.0);

        let shapes = BatchShapes::new(&config, &geom, input.shape().batch_size())?;
        Ok(Self {
            config,
            geom,
            input: input.clone(),
            weights,
            bias,
            columns: Variable::new(shapes.columns),
            filter_major: Variable::new(shapes.filter_major),
            output: Variable::new(shapes.output),
        })
    }

    pub fn geometry(&self) -> &Window2d {
        &self.geom
    }

    fn vars(&self) -> ConvVariables<'_> {
        ConvVariables {
            input: &self.input,
            weights: &self.weights,
            bias: &self.bias,
            columns: &self.columns,
            filter_major: &self.filter_major,
            output: &self.output,
        }
    }
}

impl Layer for Conv2DLayer {
    fn name(&self) -> &'static str {
        "conv2d"
    }

    fn input(&self) -> &Variable {
        &self.input
    }

    fn output(&self) -> &Variable {
        &self.output
    }

    fn forward(&mut self, storage: &mut Storage, _training: bool) -> Result<()> {
        convolution::forward(storage, &self.geom, &self.vars())
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        convolution::backward(storage, &self.geom, &self.vars())
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        let geom = self.config.window(input.dims())?;
        if geom.patch_len() != self.geom.patch_len() {
            return Err(Error::InvalidShape(format!(
                "convolution was built for {} input channels, got input {}",
                self.geom.channels,
                input.shape()
            )));
        }
        let shapes = BatchShapes::new(&self.config, &geom, input.shape().batch_size())?;
        self.geom = geom;
        self.input = input.clone();
        self.columns.set_shape(shapes.columns);
        self.filter_major.set_shape(shapes.filter_major);
        self.output.set_shape(shapes.output);
        Ok(())
    }

    fn copy(
        &self,
        input: &Variable,
        src: &Storage,
        dst: &mut Storage,
    ) -> Result<Option<Box<dyn Layer>>> {
        let geom = self.config.window(input.dims())?;
        let shapes = BatchShapes::new(&self.config, &geom, input.shape().batch_size())?;
        Ok(Some(Box::new(Self {
            config: self.config,
            geom,
            input: input.clone(),
            weights: copy_state(&self.weights, src, dst)?,
            bias: copy_state(&self.bias, src, dst)?,
            columns: Variable::new(shapes.columns),
            filter_major: Variable::new(shapes.filter_major),
            output: Variable::new(shapes.output),
        })))
    }

    fn parameters(&self) -> Vec<&Variable> {
        vec![&self.weights, &self.bias]
    }
}
