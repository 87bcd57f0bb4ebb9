mod dispatch_gate;
mod review_metadata;
mod support;
