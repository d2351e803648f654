// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4

//! `style-synthesis` blends the structural content of one image with the
//! texture statistics of another, by iteratively adjusting the pixels of a
//! noise-initialized canvas to minimize a composed loss.
//!
//! The loss has three terms: a content term (squared distance between deep
//! activations of the canvas and of the content image), a style term
//! (normalized squared distance between Gram matrices of the canvas and of
//! the style image at five depths), and a total-variation smoothness term.
//! The canvas is updated with an adaptive per-pixel step rule; nothing
//! else is trained: the feature extractor is a frozen collaborator that
//! gradients merely flow through.
//!
//! First, you build a `Session` via a `SessionBuilder`, which follows the
//! builder pattern. Calling `build` validates the configuration, checks
//! the input images exist, and extracts the optimization targets exactly
//! once.
//!
//! `Session` has a `run()` method that drives the iteration loop, emitting
//! periodic checkpoints into a `CheckpointSink` and loss reports to a
//! `SynthesisProgress`, and returns the final canvas as a
//! `SynthesizedImage` you can save, stream, or inspect.
//!
//! ## Usage
//!
//! ```no_run
//! use style_synthesis as ss;
//!
//! // The extractor is supplied by the caller; seeded random weights work
//! // for smoke tests, pretrained weights for real synthesis.
//! let extractor = ss::ConvNet::new(ss::Topology::vgg16_seeded(0)).unwrap();
//!
//! let session = ss::Session::builder(extractor)
//!     .content(&"imgs/portrait.jpg")
//!     .style(&"imgs/mosaic.jpg")
//!     .img_dim(224)
//!     .iterations(3000)
//!     .style_weight(1e4)
//!     .save_every(1000)
//!     .build().expect("failed to build session");
//!
//! let mut sink = ss::DirectorySink::new("output").expect("output dir");
//! let img = session.run(&mut sink, None).expect("synthesis failed");
//! img.save("output/final.png").expect("failed to save image");
//! ```
mod errors;
mod extractor;
mod gram;
mod loss;
mod optimizer;
pub mod session;
mod tensor;
mod utils;

pub use image;

pub use errors::Error;
pub use extractor::{
    ConvNet, ConvWeights, ExecutionContext, Extraction, FeatureExtractor, LayerDesc, Pooling,
    Topology,
};
pub use gram::{gram, GramMatrix};
pub use loss::{LossComposer, LossTerms, LossWeights};
pub use optimizer::Adam;
pub use session::{
    CheckpointSink, CollectingSink, DirectorySink, IterationUpdate, Session, SessionBuilder,
    SynthesisProgress, SynthesizedImage,
};
pub use tensor::Tensor;
pub use utils::{load_dynamic_image, ImageSource};

/// Simple dimensions struct
#[derive(Copy, Clone)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
