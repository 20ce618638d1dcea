mod common;

use common::{eval, machine, run, unhandled_type};

#[test]
fn cond_clauses() {
    assert_eq!(run("(cond (#f 1) ((= 1 1) 2) (else 3))"), "2");
    assert_eq!(run("(cond (#f 1) (else 3))"), "3");
    assert_eq!(run("(cond ((assv 2 '((1 . a) (2 . b))) => cdr) (else 'none))"), "b");
    assert_eq!(run("(cond ((+ 1 1)))"), "2");
    assert_eq!(run("(cond (#f 1))"), "()");
}

#[test]
fn case_dispatches_with_eqv() {
    assert_eq!(run("(case (* 2 3) ((2 3 5 7) 'prime) ((1 4 6 8 9) 'composite))"), "composite");
    assert_eq!(run("(case 'x ((a) 1) (else 'other))"), "other");
    assert_eq!(run("(case 'x ((a) 1))"), "()");
}

#[test]
fn if_and_or_edge_cases() {
    assert_eq!(run("(if #f 1)"), "()");
    assert_eq!(run("(if '() 'yes 'no)"), "no");
    assert_eq!(run("(if 0 'yes 'no)"), "yes");
    assert_eq!(run("(and)"), "#t");
    assert_eq!(run("(or)"), "#f");
    assert_eq!(run("(and 1 #f (car 1))"), "#f");
    assert_eq!(run("(or #f 2 (car 1))"), "2");
    assert_eq!(run("(when #f 1)"), "()");
    assert_eq!(run("(unless #f 1 2)"), "2");
}

#[test]
fn let_family() {
    assert_eq!(run("(let ((x 1) (y 2)) (+ x y))"), "3");
    assert_eq!(run("(define x 10) (let ((x 1) (y x)) y)"), "10");
    assert_eq!(run("(let* ((x 1) (y (+ x 1))) (list x y))"), "(1 2)");
    assert_eq!(run("(let ((x)) x)"), "()");
    assert_eq!(run("(let () 5)"), "5");
}

#[test]
fn quasiquote_templates() {
    assert_eq!(run("`(1 ,(+ 1 1) ,@(list 3 4) 5)"), "(1 2 3 4 5)");
    assert_eq!(run("`(1 . ,(+ 1 1))"), "(1 . 2)");
    assert_eq!(run("`(a `(b ,(c ,(+ 1 2))))"), "(a (quasiquote (b (unquote (c 3)))))");
    assert_eq!(run("`#(1 ,(+ 1 1))"), "#(1 2)");
    assert_eq!(run("`(x ,@'())"), "(x)");
    assert_eq!(run("`sym"), "sym");
}

#[test]
fn macros_expand_at_each_use() {
    assert_eq!(
        run("(define-macro (swap! a b) (let ((tmp (gensym))) `(let ((,tmp ,a)) (set! ,a ,b) (set! ,b ,tmp))))
             (define p 1) (define q 2) (swap! p q) (list p q)"),
        "(2 1)"
    );
    assert_eq!(
        run("(define my-quote (make-macro (lambda (x) (list 'quote x)))) (my-quote (a b))"),
        "(a b)"
    );
    assert_eq!(run("(macro? (make-macro car))"), "#t");
}

#[test]
fn user_forms_receive_the_environment() {
    assert_eq!(
        run("(define twice (make-form (lambda (env expr) (eval expr env) (eval expr env))))
             (define n 0)
             (twice (set! n (+ n 1)))
             n"),
        "2"
    );
    assert_eq!(
        run("(define here (make-form (lambda (env) env)))
             (let ((k 5)) (eval 'k (here)))"),
        "5"
    );
}

#[test]
fn named_lambda_and_printing() {
    assert_eq!(run("(named-lambda (foo x) x)"), "#<closure foo>");
    assert_eq!(run("((named-lambda (foo x) (* x 2)) 4)"), "8");
    assert_eq!(run("((lambda args args) 1 2 3)"), "(1 2 3)");
    assert_eq!(run("((lambda (a . rest) (list a rest)) 1 2 3)"), "(1 (2 3))");
}

#[test]
fn malformed_and_misapplied_forms() {
    let mut m = machine();
    assert_eq!(unhandled_type(&mut m, "(if)"), "wrong-argument-count");
    assert_eq!(unhandled_type(&mut m, "(lambda (1) 1)"), "malformed-expression");
    assert_eq!(unhandled_type(&mut m, "(let ((x 1 2)) x)"), "malformed-expression");
    assert_eq!(unhandled_type(&mut m, "(cond 5)"), "malformed-expression");
    assert_eq!(unhandled_type(&mut m, "(car . 1)"), "malformed-expression");
    assert_eq!(unhandled_type(&mut m, "(\"str\" 1)"), "not-applicable");
    assert_eq!(unhandled_type(&mut m, "(undefined-fn 1)"), "unbound-variable");
    // Nothing leaked from the failures.
    assert_eq!(m.depth(), 0);
    assert_eq!(eval(&mut m, "(if #t 'ok)").unwrap(), "ok");
}

#[test]
fn arithmetic() {
    assert_eq!(run("(+ 1 2 3)"), "6");
    assert_eq!(run("(- 10)"), "-10");
    assert_eq!(run("(/ 10 4)"), "2.5");
    assert_eq!(run("(/ 10 5)"), "2");
    assert_eq!(run("(list (quotient 7 2) (remainder -7 2) (modulo -7 2))"), "(3 -1 1)");
    assert_eq!(run("(< 1 2 3)"), "#t");
    assert_eq!(run("(< 1 3 2)"), "#f");
    let mut m = machine();
    assert_eq!(unhandled_type(&mut m, "(quotient 1 0)"), "arithmetic-error");
    assert_eq!(unhandled_type(&mut m, "(+ 1 'a)"), "type-mismatch");
}

#[test]
fn list_library() {
    assert_eq!(run("(map + '(1 2 3) '(10 20 30))"), "(11 22 33)");
    assert_eq!(run("(filter (lambda (x) (> x 1)) '(1 2 3))"), "(2 3)");
    assert_eq!(run("(reduce - 0 '(1 2 3))"), "-6");
    assert_eq!(run("(append '(1) '(2 3) '() '(4))"), "(1 2 3 4)");
    assert_eq!(run("(member '(2) '((1) (2) (3)))"), "((2) (3))");
    assert_eq!(run("(memq 'z '(a b))"), "#f");
    assert_eq!(run("(assoc \"b\" '((\"a\" . 1) (\"b\" . 2)))"), "(\"b\" . 2)");
    assert_eq!(run("(list (car '()) (cdr '()))"), "(() ())");
    assert_eq!(
        run("(define acc '()) (for-each (lambda (x) (set! acc (cons x acc))) '(1 2 3)) acc"),
        "(3 2 1)"
    );
}

#[test]
fn vector_constructors() {
    assert_eq!(run("(make-vector 3 'x)"), "#(x x x)");
    assert_eq!(run("(make-vector 2)"), "#(() ())");
    assert_eq!(run("(vector-ref (vector 1 2 3) 1)"), "2");
    let mut m = machine();
    assert_eq!(unhandled_type(&mut m, "(make-vector 4611686018427387904)"), "error");
    assert_eq!(unhandled_type(&mut m, "(make-vector 20000000 0)"), "error");
    assert_eq!(
        eval(
            &mut m,
            "(call/ec (lambda (k)
               (with-handler <error> (lambda (c) (k (condition-field c 'irritants)))
                 (lambda () (make-vector 4611686018427387904 'x)))))"
        )
        .unwrap(),
        "(4611686018427387904)"
    );
    assert_eq!(eval(&mut m, "(vector-length (make-vector 5 0))").unwrap(), "5");
}
