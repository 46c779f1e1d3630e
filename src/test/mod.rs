
mod connector;
mod slice;
