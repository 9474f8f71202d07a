//! A three-line Put/Get/Delete smoke test against default options.

use caskdb::{Engine, Options};

fn main() {
    env_logger::init();

    let mut options = Options::default();
    options.dir_path = std::env::temp_dir().join("caskdb-basic-operation");
    let engine = Engine::open(options).expect("open database");

    engine.put(b"name".to_vec(), b"bitcask".to_vec()).expect("put");
    let val = engine.get(b"name").expect("get");
    println!("val = {}", String::from_utf8_lossy(&val));

    engine.delete(b"name").expect("delete");
}
