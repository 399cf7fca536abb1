mod kv;
mod rounds;
