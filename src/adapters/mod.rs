// 外部來源的具體實作
pub mod http;

pub use http::{
    http_sources, HttpCarbonSource, HttpCropYieldSource, HttpEndpoint, HttpErosionSource,
    HttpImagerySource,
};
