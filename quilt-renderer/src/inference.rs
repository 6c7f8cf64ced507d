//! Tiling inference for quilt images of unknown layout.
//!
//! Every candidate grid is laid over the image and the same in-tile offset is
//! sampled in every tile. For the right grid those samples show nearly the
//! same scene point, so their squared deviation from a reference color is
//! small. The candidate with the lowest total deviation wins.
//!
//! ```text
//!   candidate 4x8              candidate 8x6
//!  ┌──┬──┬──┬──┐             ┌─┬─┬─┬─┬─┬─┬─┬─┐
//!  │• │• │• │• │  low score  │•│•│•│•│•│•│•│•│  high score
//!  ├──┼──┼──┼──┤             ├─┼─┼─┼─┼─┼─┼─┼─┤
//!  │• │• │• │• │             │•│•│•│•│•│•│•│•│
//!  └──┴──┴──┴──┘             └─┴─┴─┴─┴─┴─┴─┴─┘
//! ```
//!
//! Tiles are addressed with row 0 at the bottom of the image, matching the
//! quilt layout.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::quilt::PixelBuffer;
use crate::tiling::{QuiltPreset, Tiling};

/// Image width covered by one sample step.
const SAMPLE_SPAN: u32 = 512;

/// Relative score gap under which an 8x6 grid beats a winning 4x6 grid.
const WIDE_GRID_TOLERANCE: f64 = 0.05;

/// Color each tile sample is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceStrategy {
    /// Mean of the samples across all tiles.
    #[default]
    TileMean,
    /// The sample from the center tile.
    CenterTile,
}

/// Score of one candidate layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    /// Candidate layout, sized to the image.
    pub tiling: Tiling,
    /// Accumulated squared deviation; lower is better.
    pub score: f64,
}

/// Outcome of [`infer_tiling`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TilingInference {
    /// Chosen layout.
    pub tiling: Tiling,
    /// Every scored candidate, in candidate order.
    pub scores: Vec<CandidateScore>,
    /// No candidate fit the image; `tiling` is the fallback.
    pub fell_back: bool,
    /// More than one candidate shared the best score.
    pub ambiguous: bool,
}

impl TilingInference {
    /// The ambiguity as a reportable error, if the best score was shared.
    #[must_use]
    pub fn ambiguity(&self) -> Option<RenderError> {
        self.ambiguous.then(|| {
            let tied: Vec<String> = self
                .best_scores()
                .map(|c| c.tiling.name().to_string())
                .collect();
            RenderError::LayoutInferenceAmbiguous(format!(
                "{} candidates share the best score: {}",
                tied.len(),
                tied.join(", ")
            ))
        })
    }

    #[allow(clippy::float_cmp)] // only exact ties count
    fn best_scores(&self) -> impl Iterator<Item = &CandidateScore> {
        let best = self
            .scores
            .iter()
            .map(|c| c.score)
            .fold(f64::INFINITY, f64::min);
        self.scores.iter().filter(move |c| c.score == best)
    }
}

/// Candidate layouts for an image: exact preset sizes as-is, other grids
/// resized to the image.
#[must_use]
pub fn candidate_tilings(presets: &[Tiling], width: u32, height: u32) -> Vec<Tiling> {
    presets
        .iter()
        .filter_map(|preset| {
            if preset.quilt_width() == width && preset.quilt_height() == height {
                return Some(preset.clone());
            }
            match preset.resized(width, height) {
                Ok(tiling) => Some(tiling),
                Err(e) => {
                    tracing::debug!("Skipping candidate {}: {}", preset.name(), e);
                    None
                }
            }
        })
        .collect()
}

fn sample(image: &PixelBuffer, x: u32, y_from_bottom: u32) -> [f64; 3] {
    let row = image.height() - 1 - y_from_bottom;
    let idx = (row as usize * image.width() as usize + x as usize) * 4;
    let px = &image.pixels()[idx..idx + 3];
    [
        f64::from(px[0]) / 255.0,
        f64::from(px[1]) / 255.0,
        f64::from(px[2]) / 255.0,
    ]
}

/// Self-similarity score of `tiling` over `image`; lower is more similar.
///
/// Samples every `width / 512` pixels (at least every pixel) inside one
/// tile and sums the squared RGB deviation of each tile's sample from the
/// reference color.
///
/// # Errors
///
/// Returns [`RenderError::UnsupportedTiling`] if the tiling's quilt is larger
/// than `image`.
pub fn score_tiling(
    image: &PixelBuffer,
    tiling: &Tiling,
    strategy: ReferenceStrategy,
) -> RenderResult<f64> {
    if tiling.quilt_width() > image.width() || tiling.quilt_height() > image.height() {
        return Err(RenderError::UnsupportedTiling(format!(
            "tiling {} does not fit a {}x{} image",
            tiling,
            image.width(),
            image.height()
        )));
    }
    let stride = (image.width() / SAMPLE_SPAN).max(1) as usize;
    let columns = tiling.columns();
    let rows = tiling.rows();
    let tiles = f64::from(columns * rows);
    let center = (columns * rows / 2) as usize;
    let mut samples = Vec::with_capacity((columns * rows) as usize);
    let mut score = 0.0;

    for v in (0..tiling.view_height()).step_by(stride) {
        for u in (0..tiling.view_width()).step_by(stride) {
            samples.clear();
            for ty in 0..rows {
                for tx in 0..columns {
                    samples.push(sample(
                        image,
                        tx * tiling.view_width() + u,
                        ty * tiling.view_height() + v,
                    ));
                }
            }

            let reference = match strategy {
                ReferenceStrategy::TileMean => {
                    let mut sum = [0.0; 3];
                    for s in &samples {
                        for (acc, c) in sum.iter_mut().zip(s) {
                            *acc += c;
                        }
                    }
                    sum.map(|c| c / tiles)
                }
                ReferenceStrategy::CenterTile => samples[center],
            };

            for s in &samples {
                score += s
                    .iter()
                    .zip(&reference)
                    .map(|(c, r)| (c - r) * (c - r))
                    .sum::<f64>();
            }
        }
    }
    Ok(score)
}

/// Index of the winning candidate, or `None` if there are none.
///
/// The first strictly lowest score wins; if that is a 4x6 grid and an 8x6
/// candidate scores within 5% of it, the 8x6 grid wins instead.
#[must_use]
pub fn select_candidate(scores: &[CandidateScore]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, candidate) in scores.iter().enumerate() {
        let better = match best {
            None => true,
            Some(b) => scores[b].score > candidate.score,
        };
        if better {
            best = Some(i);
        }
    }
    let best = best?;

    let grid = |c: &CandidateScore| (c.tiling.columns(), c.tiling.rows());
    if grid(&scores[best]) == (4, 6) {
        let narrow = scores[best].score;
        if let Some(wide) = scores.iter().position(|c| {
            grid(c) == (8, 6) && (c.score - narrow).abs() < WIDE_GRID_TOLERANCE * narrow
        }) {
            tracing::debug!("Preferring 8x6 over 4x6 ({} vs {})", scores[wide].score, narrow);
            return Some(wide);
        }
    }
    Some(best)
}

/// Infer the layout of `image` from `presets`.
///
/// Never fails: with no usable candidate the `fallback` is returned and
/// marked as such, and a shared best score is logged and flagged rather
/// than treated as an error.
#[must_use]
pub fn infer_tiling(
    image: &PixelBuffer,
    presets: &[Tiling],
    fallback: &Tiling,
    strategy: ReferenceStrategy,
) -> TilingInference {
    let scores: Vec<CandidateScore> = candidate_tilings(presets, image.width(), image.height())
        .into_iter()
        .filter_map(|tiling| match score_tiling(image, &tiling, strategy) {
            Ok(score) => {
                tracing::debug!("Candidate {} ({}) scored {}", tiling.name(), tiling, score);
                Some(CandidateScore { tiling, score })
            }
            Err(e) => {
                tracing::debug!("Skipping candidate {}: {}", tiling.name(), e);
                None
            }
        })
        .collect();

    let Some(selected) = select_candidate(&scores) else {
        tracing::warn!(
            "No candidate tiling fits a {}x{} image, using {}",
            image.width(),
            image.height(),
            fallback
        );
        return TilingInference {
            tiling: fallback.clone(),
            scores,
            fell_back: true,
            ambiguous: false,
        };
    };

    let mut inference = TilingInference {
        tiling: scores[selected].tiling.clone(),
        scores,
        fell_back: false,
        ambiguous: false,
    };
    inference.ambiguous = inference.best_scores().count() > 1;
    if let Some(reason) = inference.ambiguity() {
        tracing::warn!("{}; using {}", reason, inference.tiling.name());
    }
    inference
}

/// Infer the layout of `image` from the built-in presets.
#[must_use]
pub fn infer_preset_tiling(image: &PixelBuffer, strategy: ReferenceStrategy) -> TilingInference {
    let presets: Vec<Tiling> = QuiltPreset::ALL.iter().map(|p| p.tiling()).collect();
    infer_tiling(image, &presets, &Tiling::default(), strategy)
}
