//! Generators for synthetic flux data.
//!
//! Values stay inside the instrument range so every generated sample
//! survives sanitation.

use chrono::{DateTime, Duration, Utc};

use timelines_common::FluxSample;

/// Quiet-sun background at `flux` (long channel), one sample every `step`.
///
/// The short channel is a tenth of the long one, as in real data.
pub fn flat_series(start: DateTime<Utc>, count: usize, step: Duration, flux: f32) -> Vec<FluxSample> {
    (0..count)
        .map(|i| FluxSample::new(start + step * i as i32, flux / 10.0, flux))
        .collect()
}

/// Background with one flare peaking at `peak` in the middle of the series.
///
/// The flare rises linearly and decays over the second half.
pub fn flare_series(start: DateTime<Utc>, count: usize, step: Duration, peak: f32) -> Vec<FluxSample> {
    let background = 1e-7_f32;
    let middle = count / 2;
    (0..count)
        .map(|i| {
            let distance = (i as f32 - middle as f32).abs() / middle.max(1) as f32;
            let flux = background + (peak - background) * (1.0 - distance).max(0.0);
            FluxSample::new(start + step * i as i32, flux / 10.0, flux)
        })
        .collect()
}

/// Render samples as a GOES averaged CSV, header and `data:` marker included.
pub fn goes_csv(samples: &[FluxSample]) -> String {
    let mut text = String::from(":Data_list: synthetic.csv\nMissing data: -99999\ndata:\ntime_tag,xs,xl\n");
    for sample in samples {
        text.push_str(&format!(
            "{},{:e},{:e}\n",
            sample.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            sample.low_channel,
            sample.high_channel
        ));
    }
    text
}
