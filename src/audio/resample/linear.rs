//! Linear-interpolation resampler for interleaved i16.

pub struct LinearResampler {
    /// Source / target ratio (< 1.0 upsamples, > 1.0 downsamples).
    ratio: f64,
    /// Fractional read head within the current input block.
    index: f64,
    /// Last frame of the previous block, for cross-block interpolation.
    last_samples: Vec<i16>,
    primed: bool,
    channels: usize,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            ratio: source_rate as f64 / target_rate.max(1) as f64,
            index: 0.0,
            last_samples: vec![0; channels],
            primed: false,
            channels,
        }
    }

    /// Resample `input` and **append** resampled samples into `output`.
    pub fn process(&mut self, input: &[i16], output: &mut Vec<i16>) {
        let num_frames = input.len() / self.channels;
        if num_frames == 0 {
            return;
        }

        if !self.primed {
            self.last_samples.copy_from_slice(&input[..self.channels]);
            self.primed = true;
        }

        output.reserve((num_frames as f64 / self.ratio) as usize * self.channels + self.channels);

        while self.index < num_frames as f64 {
            let idx = self.index as usize;
            let fract = self.index.fract() as f32;

            for c in 0..self.channels {
                let s1 = if idx == 0 {
                    self.last_samples[c] as f32
                } else {
                    input[(idx - 1) * self.channels + c] as f32
                };
                let s2 = input[idx * self.channels + c] as f32;

                output.push((s1 * (1.0 - fract) + s2 * fract).round() as i16);
            }

            self.index += self.ratio;
        }

        self.index -= num_frames as f64;

        for c in 0..self.channels {
            self.last_samples[c] = input[(num_frames - 1) * self.channels + c];
        }
    }

    pub fn reset(&mut self) {
        self.index = 0.0;
        self.last_samples.fill(0);
        self.primed = false;
    }

    pub fn is_passthrough(&self) -> bool {
        (self.ratio - 1.0).abs() < f64::EPSILON
    }
}
