//! ### fixed capacity LRU cache
//!
//! Backs the FAT cluster cache and the allocatable cluster cache.  The
//! eviction scan is linear, which is fine at the capacities the card
//! engine uses (a dozen to a few dozen entries).

use std::collections::HashMap;
use std::hash::Hash;

pub struct LruCache<K,V> {
    capacity: usize,
    counter: u64,
    map: HashMap<K,(V,u64)>
}

impl<K: Eq + Hash + Clone,V> LruCache<K,V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counter: 0,
            map: HashMap::new()
        }
    }
    pub fn get(&mut self,key: &K) -> Option<&V> {
        self.counter += 1;
        match self.map.get_mut(key) {
            Some((v,stamp)) => {
                *stamp = self.counter;
                Some(v)
            },
            None => None
        }
    }
    pub fn get_mut(&mut self,key: &K) -> Option<&mut V> {
        self.counter += 1;
        match self.map.get_mut(key) {
            Some((v,stamp)) => {
                *stamp = self.counter;
                Some(v)
            },
            None => None
        }
    }
    /// Add or replace an entry, returning the evicted (key,value) if the
    /// cache was full.
    pub fn add(&mut self,key: K,value: V) -> Option<(K,V)> {
        self.counter += 1;
        if let Some((v,stamp)) = self.map.get_mut(&key) {
            *v = value;
            *stamp = self.counter;
            return None;
        }
        let mut evicted = None;
        if self.map.len() >= self.capacity {
            let mut oldest: Option<(K,u64)> = None;
            for (k,(_v,stamp)) in self.map.iter() {
                match &oldest {
                    Some((_k0,s0)) if *stamp >= *s0 => {},
                    _ => oldest = Some((k.clone(),*stamp))
                }
            }
            if let Some((k,_s)) = oldest {
                evicted = self.map.remove(&k).map(|(v,_s)| (k,v));
            }
        }
        self.map.insert(key,(value,self.counter));
        evicted
    }
    pub fn keys(&self) -> Vec<K> {
        self.map.keys().cloned().collect()
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K,&mut V)> {
        self.map.iter_mut().map(|(k,(v,_s))| (k,v))
    }
}

#[test]
fn evicts_least_recent() {
    let mut cache: LruCache<usize,usize> = LruCache::new(2);
    assert!(cache.add(1,10).is_none());
    assert!(cache.add(2,20).is_none());
    assert_eq!(cache.get(&1),Some(&10));
    let evicted = cache.add(3,30);
    assert_eq!(evicted,Some((2,20)));
    assert_eq!(cache.get(&2),None);
    assert_eq!(cache.get(&1),Some(&10));
    assert_eq!(cache.get(&3),Some(&30));
}

#[test]
fn replace_does_not_evict() {
    let mut cache: LruCache<usize,usize> = LruCache::new(2);
    cache.add(1,10);
    cache.add(2,20);
    assert!(cache.add(2,21).is_none());
    assert_eq!(cache.get(&1),Some(&10));
    assert_eq!(cache.get(&2),Some(&21));
}
