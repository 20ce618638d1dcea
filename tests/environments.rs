mod common;

use common::{eval, machine, run, unhandled_type};
use condlisp::{Machine, MachineConfig, UnhandledPolicy};

#[test]
fn define_binds_in_the_current_frame_only() {
    assert_eq!(
        run("(define x 1) (define (f) (define x 2) x) (list (f) x)"),
        "(2 1)"
    );
}

#[test]
fn define_returns_the_value_and_names_closures() {
    assert_eq!(run("(define x 5)"), "5");
    assert_eq!(run("(define (sq x) (* x x)) sq"), "#<closure sq>");
    assert_eq!(run("(define cube (lambda (x) (* x x x))) cube"), "#<closure cube>");
}

#[test]
fn set_mutates_the_nearest_binding() {
    assert_eq!(run("(define x 1) (define (g) (set! x 5)) (g) x"), "5");
    assert_eq!(
        run("(define x 1) (define (h) (let ((x 10)) (set! x 20) x)) (list (h) x)"),
        "(20 1)"
    );
}

#[test]
fn set_of_an_unbound_name_is_an_error() {
    let mut m = machine();
    assert_eq!(unhandled_type(&mut m, "(set! nowhere 1)"), "unbound-variable");
    assert_eq!(eval(&mut m, "(defined? nowhere)").unwrap(), "#f");
}

#[test]
fn unset_removes_a_binding() {
    let mut m = machine();
    eval(&mut m, "(define y 1)").unwrap();
    assert_eq!(eval(&mut m, "(unset! y)").unwrap(), "#t");
    assert_eq!(eval(&mut m, "(defined? y)").unwrap(), "#f");
    assert_eq!(eval(&mut m, "(unset! y)").unwrap(), "#f");
    assert_eq!(unhandled_type(&mut m, "y"), "unbound-variable");
}

#[test]
fn define_variable_only_defines_unbound_names() {
    assert_eq!(
        run("(define a 1) (define-variable a 2) (define-variable b 3) (list a b)"),
        "(1 3)"
    );
}

#[test]
fn shadowing_a_form_name_makes_an_ordinary_call() {
    let mut m = machine();
    assert_eq!(
        eval(&mut m, "(let ((if (lambda (a b) (+ a b)))) (if 1 2))").unwrap(),
        "3"
    );
    eval(&mut m, "(define (f if) (if 1 2))").unwrap();
    assert_eq!(unhandled_type(&mut m, "(f 5)"), "not-applicable");
    // Outside those scopes `if` is still the form.
    assert_eq!(eval(&mut m, "(if #f 1 2)").unwrap(), "2");
}

#[test]
fn closures_over_one_frame_share_mutations() {
    let mut m = machine();
    eval(
        &mut m,
        "(define (make-counter)
           (let ((n 0))
             (list (lambda () (set! n (+ n 1)) n)
                   (lambda () n))))
         (define p (make-counter))
         (define q (make-counter))",
    )
    .unwrap();
    eval(&mut m, "((car p)) ((car p))").unwrap();
    assert_eq!(eval(&mut m, "((car (cdr p)))").unwrap(), "2");
    assert_eq!(eval(&mut m, "((car (cdr q)))").unwrap(), "0");
}

#[test]
fn letrec_functions_see_each_other() {
    assert_eq!(
        run("(letrec ((ev? (lambda (n) (if (= n 0) #t (od? (- n 1)))))
                      (od? (lambda (n) (if (= n 0) #f (ev? (- n 1))))))
               (list (ev? 10) (od? 7)))"),
        "(#t #t)"
    );
}

#[test]
fn do_iterations_get_fresh_frames() {
    assert_eq!(
        run("(do ((i 0 (+ i 1))
                  (acc '() (cons (lambda () i) acc)))
                 ((= i 3) (map (lambda (f) (f)) acc)))"),
        "(2 1 0)"
    );
}

#[test]
fn the_environment_can_be_evaluated_in() {
    assert_eq!(run("(define (f x) (the-environment)) (eval 'x (f 42))"), "42");
    assert_eq!(run("(eval-proc '((define z 3) (* z z)) (make-environment))"), "9");
}

#[test]
fn first_class_environment_operations() {
    let mut m = machine();
    eval(&mut m, "(define e (make-environment))").unwrap();
    assert_eq!(eval(&mut m, "(define-in-environment! e 'k 7)").unwrap(), "7");
    assert_eq!(eval(&mut m, "(lookup-in-environment e 'k)").unwrap(), "7");
    assert_eq!(eval(&mut m, "(lookup-in-environment e 'missing 'dflt)").unwrap(), "dflt");
    assert_eq!(eval(&mut m, "(environment-variables e)").unwrap(), "(k)");
    // Lookups continue into the global frame.
    assert_eq!(eval(&mut m, "(procedure? (lookup-in-environment e 'car))").unwrap(), "#t");
    assert_eq!(eval(&mut m, "(set-in-environment! e 'k 8)").unwrap(), "8");
    assert_eq!(eval(&mut m, "(eval 'k e)").unwrap(), "8");
    assert_eq!(eval(&mut m, "(unset-from-environment! e 'k)").unwrap(), "#t");
    assert_eq!(
        unhandled_type(&mut m, "(lookup-in-environment e 'k)"),
        "unbound-variable"
    );
    assert_eq!(
        eval(&mut m, "(eq? (environment-parent e) (global-environment))").unwrap(),
        "#t"
    );
}

#[test]
fn symbols_are_interned_by_qualified_name() {
    assert_eq!(run("(eq? 'foo (string->symbol \"foo\"))"), "#t");
    assert_eq!(run("(eq? 'user:foo 'foo)"), "#t");
    assert_eq!(run("(eq? 'other:foo 'foo)"), "#f");
    assert_eq!(run("'other:foo"), "other:foo");
    assert_eq!(run("(eq? (gensym) (gensym))"), "#f");
    assert_eq!(run("(eq? (gensym \"foo\") 'foo1)"), "#f");
}

#[test]
fn unreachable_gensyms_are_collected() {
    let mut config = MachineConfig::default().with_policy(UnhandledPolicy::Return);
    config.gc_threshold = 1024;
    let mut m = Machine::new(config).unwrap();
    eval(
        &mut m,
        "(define keep (gensym \"keep\"))
         (define keep-name (symbol->string keep))
         (define-macro (swap! a b) (let ((tmp (gensym))) `(let ((,tmp ,a)) (set! ,a ,b) (set! ,b ,tmp))))
         (define p 1) (define q 2)",
    )
    .unwrap();
    m.collect_garbage();
    let before = m.symbols.count();
    assert_eq!(
        eval(&mut m, "(do ((i 0 (+ i 1))) ((= i 50000) (list p q)) (gensym) (swap! p q))").unwrap(),
        "(1 2)"
    );
    m.collect_garbage();
    assert!(m.symbols.count() < before + 100, "{} symbols live", m.symbols.count());
    assert_eq!(eval(&mut m, "(equal? (symbol->string keep) keep-name)").unwrap(), "#t");
    assert_eq!(eval(&mut m, "(eq? keep (gensym \"keep\"))").unwrap(), "#f");
}

#[test]
fn empty_and_default_environments() {
    let mut m = machine();
    eval(&mut m, "(define e (make-empty-environment))").unwrap();
    assert_eq!(eval(&mut m, "(environment-parent e)").unwrap(), "()");
    assert_eq!(eval(&mut m, "(environment-variables e)").unwrap(), "()");
    assert_eq!(eval(&mut m, "(eval 5 e)").unwrap(), "5");
    assert_eq!(unhandled_type(&mut m, "(eval '(if #t 1 2) e)"), "unbound-variable");
    eval(&mut m, "(define-in-environment! e 'x 1)").unwrap();
    assert_eq!(eval(&mut m, "(eval 'x e)").unwrap(), "1");

    eval(&mut m, "(define mine 1) (define (car x) 'shadowed)").unwrap();
    eval(&mut m, "(define d (make-default-environment))").unwrap();
    assert_eq!(eval(&mut m, "(eval '(car '(a b)) d)").unwrap(), "a");
    assert_eq!(unhandled_type(&mut m, "(eval 'mine d)"), "unbound-variable");
    assert_eq!(eval(&mut m, "(eval '(define (sq n) (* n n)) d)").unwrap(), "#<closure sq>");
    assert_eq!(eval(&mut m, "(eval '(sq 4) d)").unwrap(), "16");
    assert_eq!(unhandled_type(&mut m, "(sq 4)"), "unbound-variable");
    assert_eq!(eval(&mut m, "(eq? (environment-parent d) '())").unwrap(), "#t");
    assert_eq!(
        eval(&mut m, "(eval '(eq? (make-default-environment) (make-default-environment)) d)").unwrap(),
        "#f"
    );
}
