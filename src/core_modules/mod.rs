pub mod color_sampler;
pub mod conic;
pub mod edge_contours;
pub mod ellipse_scorer;
pub mod frame;
pub mod signal_analyzer;
pub mod smoothing;
pub mod threshold;
pub mod tracker;
