pub mod libs {
    pub mod binesc;
    pub mod cursor;
    pub mod dispatcher;
    pub mod error;
    pub mod framer;
    pub mod hex;
    pub mod ingest;
    pub mod target;
    pub mod transport;
}
